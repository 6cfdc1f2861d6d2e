use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Exported records of closed tickets. Failure to produce a transcript is
/// never fatal to the caller — a missing transcript beats a stuck ticket.
#[async_trait]
pub trait TranscriptManager: Send + Sync {
    /// Record one relayed line for a channel's eventual transcript.
    async fn record_message(&self, channel_id: &str, author: &str, body: &str);

    /// Remember which contact a channel belongs to so the transcript can be
    /// filed under the phone number even after the mapping is removed.
    async fn ensure_phone_for_transcript(&self, channel_id: &str, phone: &str, username: &str);

    /// Write the transcript for a channel. Returns the file path, or `None`
    /// if nothing could be written.
    async fn generate_transcript(&self, channel_id: &str, closed_by: &str) -> Option<PathBuf>;

    /// The transcript left behind by the contact's previous ticket, if any.
    async fn previous_transcript(&self, phone: &str) -> Option<PathBuf>;
}

#[derive(Debug, Clone)]
struct TranscriptLine {
    at: DateTime<Utc>,
    author: String,
    body: String,
}

#[derive(Debug, Clone)]
struct ContactInfo {
    phone: String,
    username: String,
}

/// Plain-text transcripts on disk, one file per contact phone number so a
/// reopened ticket can attach the previous conversation.
pub struct FileTranscriptManager {
    dir: PathBuf,
    inner: Mutex<TranscriptState>,
}

#[derive(Default)]
struct TranscriptState {
    lines: HashMap<String, Vec<TranscriptLine>>,
    contacts: HashMap<String, ContactInfo>,
}

impl FileTranscriptManager {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            inner: Mutex::new(TranscriptState::default()),
        }
    }

    fn transcript_path(&self, phone: &str) -> PathBuf {
        let safe: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        self.dir.join(format!("{safe}.txt"))
    }

    fn render(contact: &ContactInfo, closed_by: &str, lines: &[TranscriptLine]) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Transcript for {} ({})\nClosed by {} at {}\n\n",
            contact.username,
            contact.phone,
            closed_by,
            Utc::now().to_rfc3339()
        ));
        for line in lines {
            out.push_str(&format!(
                "[{}] {}: {}\n",
                line.at.format("%Y-%m-%d %H:%M:%S"),
                line.author,
                line.body
            ));
        }
        out
    }
}

#[async_trait]
impl TranscriptManager for FileTranscriptManager {
    async fn record_message(&self, channel_id: &str, author: &str, body: &str) {
        let mut state = self.inner.lock();
        state
            .lines
            .entry(channel_id.to_string())
            .or_default()
            .push(TranscriptLine {
                at: Utc::now(),
                author: author.to_string(),
                body: body.to_string(),
            });
    }

    async fn ensure_phone_for_transcript(&self, channel_id: &str, phone: &str, username: &str) {
        let mut state = self.inner.lock();
        state.contacts.insert(
            channel_id.to_string(),
            ContactInfo {
                phone: phone.to_string(),
                username: username.to_string(),
            },
        );
    }

    async fn generate_transcript(&self, channel_id: &str, closed_by: &str) -> Option<PathBuf> {
        let (contact, lines) = {
            let mut state = self.inner.lock();
            let contact = state.contacts.remove(channel_id)?;
            let lines = state.lines.remove(channel_id).unwrap_or_default();
            (contact, lines)
        };

        let path = self.transcript_path(&contact.phone);
        let content = Self::render(&contact, closed_by, &lines);

        if let Err(err) = std::fs::create_dir_all(&self.dir) {
            warn!("failed to create transcript directory: {err}");
            return None;
        }
        match std::fs::write(&path, content) {
            Ok(()) => {
                debug!(channel_id, path = %path.display(), "wrote transcript");
                Some(path)
            }
            Err(err) => {
                warn!(channel_id, "failed to write transcript: {err}");
                None
            }
        }
    }

    async fn previous_transcript(&self, phone: &str) -> Option<PathBuf> {
        let path = self.transcript_path(phone);
        path.exists().then_some(path)
    }
}

pub fn read_transcript_bytes(path: &Path) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            warn!("failed to read transcript {}: {err}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{FileTranscriptManager, TranscriptManager};

    #[tokio::test]
    async fn transcript_contains_recorded_lines() {
        let dir = TempDir::new().expect("temp dir");
        let transcripts = FileTranscriptManager::new(dir.path());

        transcripts
            .ensure_phone_for_transcript("chan-1", "15551234567", "Alice")
            .await;
        transcripts.record_message("chan-1", "Alice", "hello").await;
        transcripts.record_message("chan-1", "staff", "hi there").await;

        let path = transcripts
            .generate_transcript("chan-1", "moderator")
            .await
            .expect("transcript written");

        let content = std::fs::read_to_string(&path).expect("read transcript");
        assert!(content.contains("Alice (15551234567)"));
        assert!(content.contains("Closed by moderator"));
        assert!(content.contains("Alice: hello"));
        assert!(content.contains("staff: hi there"));
    }

    #[tokio::test]
    async fn generate_without_contact_returns_none() {
        let dir = TempDir::new().expect("temp dir");
        let transcripts = FileTranscriptManager::new(dir.path());

        assert!(transcripts
            .generate_transcript("chan-unknown", "moderator")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn previous_transcript_found_after_close() {
        let dir = TempDir::new().expect("temp dir");
        let transcripts = FileTranscriptManager::new(dir.path());

        assert!(transcripts.previous_transcript("15551234567").await.is_none());

        transcripts
            .ensure_phone_for_transcript("chan-1", "15551234567", "Alice")
            .await;
        transcripts.record_message("chan-1", "Alice", "hello").await;
        transcripts
            .generate_transcript("chan-1", "moderator")
            .await
            .expect("transcript written");

        let previous = transcripts.previous_transcript("15551234567").await;
        assert!(previous.is_some());
    }
}
