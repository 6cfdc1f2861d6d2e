use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::info;

/// Events emitted by a WhatsApp session. History variants carry the
/// transport's per-conversation ordering key because history can be
/// redelivered out of order on reconnect.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Message {
        phone: String,
        text: String,
        attachments: Vec<String>,
    },
    HistoryMessage {
        phone: String,
        text: String,
        sequence: u64,
    },
    HistorySyncComplete {
        phone: String,
    },
    Qr(String),
    Ready,
    Disconnected,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("whatsapp session is not connected")]
    NotConnected,
    #[error("whatsapp transport error: {0}")]
    Transport(String),
}

/// One WhatsApp connection, pairing and transport details opaque.
///
/// `connect(show_qr)` returns true once the session is usable; with
/// `show_qr` set, a `SessionEvent::Qr` is emitted if pairing is needed.
/// `disconnect(logout)` additionally unlinks the device when `logout` is set.
#[async_trait]
pub trait WhatsAppSession: Send + Sync {
    async fn connect(&self, show_qr: bool) -> Result<bool, SessionError>;
    async fn disconnect(&self, logout: bool);
    fn is_connected(&self) -> bool;
    async fn send_message(&self, phone: &str, text: &str) -> Result<(), SessionError>;
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
    /// Drop on-disk auth material so the next connect forces a fresh pairing.
    async fn clear_auth(&self) -> Result<(), SessionError>;
}

/// Builds one session per instance, rooted at that instance's auth directory.
pub trait SessionFactory: Send + Sync {
    fn create(&self, instance_id: &str, auth_dir: &Path) -> Arc<dyn WhatsAppSession>;
}

/// Session used when no transport has been linked in yet: never connected,
/// every send fails. Mirrors the mock fallbacks the Discord side keeps for
/// unfinished integrations.
pub struct OfflineSession {
    auth_dir: PathBuf,
    events: broadcast::Sender<SessionEvent>,
}

impl OfflineSession {
    pub fn new<P: Into<PathBuf>>(auth_dir: P) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            auth_dir: auth_dir.into(),
            events,
        }
    }
}

#[async_trait]
impl WhatsAppSession for OfflineSession {
    async fn connect(&self, show_qr: bool) -> Result<bool, SessionError> {
        info!(show_qr, "offline whatsapp session asked to connect");
        Err(SessionError::NotConnected)
    }

    async fn disconnect(&self, _logout: bool) {}

    fn is_connected(&self) -> bool {
        false
    }

    async fn send_message(&self, _phone: &str, _text: &str) -> Result<(), SessionError> {
        Err(SessionError::NotConnected)
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn clear_auth(&self) -> Result<(), SessionError> {
        if self.auth_dir.exists() {
            tokio::fs::remove_dir_all(&self.auth_dir)
                .await
                .map_err(|err| SessionError::Transport(err.to_string()))?;
        }
        Ok(())
    }
}

pub struct OfflineSessionFactory;

impl SessionFactory for OfflineSessionFactory {
    fn create(&self, _instance_id: &str, auth_dir: &Path) -> Arc<dyn WhatsAppSession> {
        Arc::new(OfflineSession::new(auth_dir))
    }
}
