use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::TicketsConfig;
use crate::discord::{
    ticket_channel_name, ChannelCreation, CreatedChannel, DiscordApi,
};
use crate::store::{InstanceSettings, TicketStatus};
use crate::tickets::channel_manager::TicketChannelManager;
use crate::tickets::restore::RestoreQueue;
use crate::transcript::{read_transcript_bytes, TranscriptManager};
use crate::whatsapp::WhatsAppSession;

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9]{5,15}$").unwrap());

/// Result of a close attempt. A duplicate trigger is an expected outcome,
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    AlreadyClosing,
    NotATicket,
}

/// Orchestrates a ticket channel through `open → closing → deleted`.
///
/// Creation registers the phone↔channel mapping and sends the bootstrap
/// message sequence; closing is guarded against duplicate triggers, generates
/// a transcript best-effort, and schedules the channel deletion after a short
/// delay so the closing confirmation stays readable.
pub struct TicketLifecycle {
    guild_id: String,
    category_id: String,
    discord: Arc<dyn DiscordApi>,
    session: Arc<dyn WhatsAppSession>,
    transcripts: Arc<dyn TranscriptManager>,
    channels: Arc<TicketChannelManager>,
    settings: Arc<RwLock<InstanceSettings>>,
    defaults: TicketsConfig,
    restore: RestoreQueue,
    delete_delay: Duration,
}

impl TicketLifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guild_id: &str,
        category_id: &str,
        discord: Arc<dyn DiscordApi>,
        session: Arc<dyn WhatsAppSession>,
        transcripts: Arc<dyn TranscriptManager>,
        channels: Arc<TicketChannelManager>,
        settings: Arc<RwLock<InstanceSettings>>,
        defaults: TicketsConfig,
        delete_delay: Duration,
    ) -> Self {
        Self {
            guild_id: guild_id.to_string(),
            category_id: category_id.to_string(),
            discord,
            session,
            transcripts,
            channels,
            settings,
            defaults,
            restore: RestoreQueue::new(),
            delete_delay,
        }
    }

    pub fn channels(&self) -> &TicketChannelManager {
        &self.channels
    }

    /// Open a ticket channel for a contact, or return the existing one if an
    /// open ticket is already registered for the phone number.
    ///
    /// Guild/category resolution failures abort the call. A failure after the
    /// channel exists (bootstrap sends) propagates too, but the channel and
    /// its mapping are kept: a retry routes into the same channel instead of
    /// duplicating it.
    pub async fn create_ticket(&self, phone: &str, username: &str) -> Result<CreatedChannel> {
        let phone = phone.trim();
        let username = username.trim();
        if username.is_empty() {
            bail!("a contact name is required to open a ticket");
        }
        if !PHONE_RE.is_match(phone) {
            bail!("invalid phone number: {phone:?}");
        }

        if let Some(existing) = self.channels.channel_id(phone) {
            if !self.channels.is_closed(&existing) {
                debug!(phone, channel_id = %existing, "ticket already open, reusing channel");
                return Ok(CreatedChannel {
                    id: existing,
                    name: ticket_channel_name(username, phone),
                });
            }
        }

        let category_found = self
            .discord
            .category_exists(&self.guild_id, &self.category_id)
            .await
            .map_err(|err| anyhow!("failed to resolve ticket category: {err}"))?;
        if !category_found {
            bail!(
                "ticket category {} not found in guild {}",
                self.category_id,
                self.guild_id
            );
        }

        let name = ticket_channel_name(username, phone);
        let channel = self.create_channel_with_fallback(&name).await?;

        self.channels.set_mapping(phone, &channel.id);
        self.channels.set_status(&channel.id, TicketStatus::Open);
        self.transcripts
            .ensure_phone_for_transcript(&channel.id, phone, username)
            .await;

        self.send_bootstrap_messages(&channel, phone, username)
            .await?;

        info!(phone, channel_id = %channel.id, "opened ticket channel");
        Ok(channel)
    }

    /// Bounded creation fallback: each attempt asks Discord for less, and the
    /// pieces dropped from a later attempt are retried individually once the
    /// channel exists.
    async fn create_channel_with_fallback(&self, name: &str) -> Result<CreatedChannel> {
        let mut mode = ChannelCreation::FullPerms;
        let channel = loop {
            match self
                .discord
                .create_ticket_channel(&self.guild_id, &self.category_id, name, mode)
                .await
            {
                Ok(channel) => break (channel, mode),
                Err(err) => {
                    let Some(next) = mode.next_fallback() else {
                        return Err(anyhow!("failed to create ticket channel: {err}"));
                    };
                    warn!(
                        "channel creation attempt {:?} failed ({err}), retrying with {:?}",
                        mode, next
                    );
                    mode = next;
                }
            }
        };
        let (channel, mode) = channel;

        if mode == ChannelCreation::Bare {
            if let Err(err) = self
                .discord
                .move_to_category(&channel.id, &self.category_id)
                .await
            {
                warn!(channel_id = %channel.id, "could not move ticket into category: {err}");
            }
        }
        if mode != ChannelCreation::FullPerms {
            if let Err(err) = self
                .discord
                .apply_ticket_overwrites(&self.guild_id, &channel.id)
                .await
            {
                warn!(channel_id = %channel.id, "could not apply ticket overwrites: {err}");
            }
        }

        Ok(channel)
    }

    async fn send_bootstrap_messages(
        &self,
        channel: &CreatedChannel,
        phone: &str,
        username: &str,
    ) -> Result<()> {
        let settings = self.settings.read().await.clone();
        let vars = [("name", username), ("phoneNumber", phone)];

        let previous = if settings.transcripts_enabled.unwrap_or(true) {
            self.transcripts.previous_transcript(phone).await
        } else {
            None
        };
        let reopened = previous.is_some();

        let marker = settings
            .new_ticket_message
            .as_deref()
            .unwrap_or(&self.defaults.new_ticket_template);
        self.discord
            .send_message(
                &channel.id,
                &crate::utils::formatting::apply_template(marker, &vars),
            )
            .await
            .map_err(|err| anyhow!("failed to send new-ticket marker: {err}"))?;

        if let Some(path) = previous {
            if let Some(bytes) = read_transcript_bytes(&path) {
                if let Err(err) = self
                    .discord
                    .send_file(&channel.id, &bytes, "previous_transcript.txt")
                    .await
                {
                    warn!(channel_id = %channel.id, "could not attach previous transcript: {err}");
                }
            }
        }

        let greeting = if reopened {
            settings
                .reopen_message
                .as_deref()
                .or(settings.welcome_message.as_deref())
                .unwrap_or(&self.defaults.welcome_template)
        } else {
            settings
                .welcome_message
                .as_deref()
                .unwrap_or(&self.defaults.welcome_template)
        };
        self.discord
            .send_message(
                &channel.id,
                &crate::utils::formatting::apply_template(greeting, &vars),
            )
            .await
            .map_err(|err| anyhow!("failed to send ticket greeting: {err}"))?;

        // Contact-side greeting, if configured.
        if let Some(intro) = settings.intro_message.as_deref() {
            if let Err(err) = self
                .session
                .send_message(
                    phone,
                    &crate::utils::formatting::apply_template(intro, &vars),
                )
                .await
            {
                warn!(phone, "could not send intro message to contact: {err}");
            }
        }

        let info = format!("Ticket for {username} ({phone}). Controls: edit settings or close.");
        match self.discord.send_message(&channel.id, &info).await {
            Ok(message_id) => {
                if let Err(err) = self.discord.pin_message(&channel.id, &message_id).await {
                    warn!(channel_id = %channel.id, "could not pin ticket info message: {err}");
                }
            }
            Err(err) => {
                warn!(channel_id = %channel.id, "could not post ticket info message: {err}");
            }
        }

        Ok(())
    }

    /// Close a ticket: guarded against duplicate triggers, so two racing
    /// calls produce exactly one transcript and one deletion.
    pub async fn close_ticket(&self, channel_id: &str, closed_by: &str) -> Result<CloseOutcome> {
        let Some(phone) = self.channels.phone(channel_id) else {
            debug!(channel_id, "close requested for a channel with no ticket mapping");
            return Ok(CloseOutcome::NotATicket);
        };

        if !self.channels.try_begin_closing(channel_id) {
            info!(channel_id, "ticket already closing, ignoring duplicate close");
            return Ok(CloseOutcome::AlreadyClosing);
        }

        let settings = self.settings.read().await.clone();

        // Only message the contact when explicitly enabled.
        if settings.send_closing_message == Some(true) {
            let template = settings
                .closing_message
                .as_deref()
                .unwrap_or(&self.defaults.closing_template);
            if let Err(err) = self.session.send_message(&phone, template).await {
                warn!(%phone, "could not send closing message: {err}");
            }
        }

        if settings.transcripts_enabled.unwrap_or(true) {
            if self
                .transcripts
                .generate_transcript(channel_id, closed_by)
                .await
                .is_none()
            {
                warn!(channel_id, "no transcript produced for closed ticket");
            }
        }

        self.channels.remove_mapping_for_channel(&phone, channel_id);
        self.channels.set_status(channel_id, TicketStatus::Closed);
        self.schedule_channel_delete(channel_id);

        info!(channel_id, %phone, closed_by, "ticket closed");
        Ok(CloseOutcome::Closed)
    }

    /// Delete the channel after a short delay. The closing guard is released
    /// whatever the outcome — keeping it would lock the id out of any future
    /// close attempt, which is worse than a duplicate delete attempt.
    fn schedule_channel_delete(&self, channel_id: &str) {
        let discord = self.discord.clone();
        let channels = self.channels.clone();
        let channel_id = channel_id.to_string();
        let delay = self.delete_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = discord.delete_channel(&channel_id).await {
                warn!(%channel_id, "failed to delete closed ticket channel: {err}");
            }
            channels.release_closing_guard(&channel_id);
        });
    }

    /// Record one relayed line for the channel's eventual transcript.
    pub async fn record_transcript_line(&self, channel_id: &str, author: &str, body: &str) {
        self.transcripts.record_message(channel_id, author, body).await;
    }

    pub fn begin_restore(&self, channel_id: &str) {
        self.restore.begin(channel_id);
    }

    pub fn next_restore_sequence(&self, channel_id: &str) -> u64 {
        self.restore.next_sequence(channel_id)
    }

    pub fn is_restoring(&self, channel_id: &str) -> bool {
        self.restore.is_restoring(channel_id)
    }

    pub fn queue_restored_message(&self, channel_id: &str, sequence: u64, content: String) {
        self.restore.enqueue(channel_id, sequence, content);
    }

    /// Flush a channel's restoration queue to Discord in sequence order.
    /// A failed send is logged and skipped so one bad message cannot wedge
    /// the rest of the history.
    pub async fn finish_restore(&self, channel_id: &str) -> usize {
        let messages = self.restore.finish(channel_id);
        let total = messages.len();
        for message in messages {
            if let Err(err) = self.discord.send_message(channel_id, &message.content).await {
                warn!(
                    channel_id,
                    sequence = message.sequence,
                    "failed to deliver restored message: {err}"
                );
            }
        }
        if total > 0 {
            info!(channel_id, total, "flushed restored messages");
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::TempDir;
    use tokio::sync::{broadcast, RwLock};

    use super::{CloseOutcome, TicketLifecycle};
    use crate::config::TicketsConfig;
    use crate::discord::{ChannelCreation, CreatedChannel, DiscordApi, DiscordApiError};
    use crate::store::{ConfigStore, InstanceSettings, TicketStatus};
    use crate::tickets::channel_manager::TicketChannelManager;
    use crate::transcript::{FileTranscriptManager, TranscriptManager};
    use crate::whatsapp::{SessionError, SessionEvent, WhatsAppSession};

    #[derive(Default)]
    struct MockDiscord {
        next_channel_id: AtomicU64,
        fail_modes: Vec<ChannelCreation>,
        fail_pin: bool,
        missing_category: bool,
        created: Mutex<Vec<(String, ChannelCreation)>>,
        moved: Mutex<Vec<(String, String)>>,
        deleted: Mutex<Vec<String>>,
        messages: Mutex<Vec<(String, String)>>,
        files: Mutex<Vec<(String, String)>>,
        pinned: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl DiscordApi for MockDiscord {
        async fn category_exists(
            &self,
            _guild_id: &str,
            _category_id: &str,
        ) -> Result<bool, DiscordApiError> {
            Ok(!self.missing_category)
        }

        async fn create_ticket_channel(
            &self,
            _guild_id: &str,
            _category_id: &str,
            name: &str,
            mode: ChannelCreation,
        ) -> Result<CreatedChannel, DiscordApiError> {
            if self.fail_modes.contains(&mode) {
                return Err(DiscordApiError::PermissionDenied(format!(
                    "creation refused in mode {mode:?}"
                )));
            }
            let id = self.next_channel_id.fetch_add(1, Ordering::SeqCst) + 100;
            self.created.lock().push((name.to_string(), mode));
            Ok(CreatedChannel {
                id: id.to_string(),
                name: name.to_string(),
            })
        }

        async fn move_to_category(
            &self,
            channel_id: &str,
            category_id: &str,
        ) -> Result<(), DiscordApiError> {
            self.moved
                .lock()
                .push((channel_id.to_string(), category_id.to_string()));
            Ok(())
        }

        async fn apply_ticket_overwrites(
            &self,
            _guild_id: &str,
            _channel_id: &str,
        ) -> Result<(), DiscordApiError> {
            Ok(())
        }

        async fn delete_channel(&self, channel_id: &str) -> Result<(), DiscordApiError> {
            self.deleted.lock().push(channel_id.to_string());
            Ok(())
        }

        async fn send_message(
            &self,
            channel_id: &str,
            content: &str,
        ) -> Result<String, DiscordApiError> {
            let mut messages = self.messages.lock();
            messages.push((channel_id.to_string(), content.to_string()));
            Ok(format!("msg-{}", messages.len()))
        }

        async fn send_file(
            &self,
            channel_id: &str,
            _data: &[u8],
            filename: &str,
        ) -> Result<String, DiscordApiError> {
            self.files
                .lock()
                .push((channel_id.to_string(), filename.to_string()));
            Ok("file-msg".to_string())
        }

        async fn pin_message(
            &self,
            channel_id: &str,
            message_id: &str,
        ) -> Result<(), DiscordApiError> {
            if self.fail_pin {
                return Err(DiscordApiError::PermissionDenied("cannot pin".to_string()));
            }
            self.pinned
                .lock()
                .push((channel_id.to_string(), message_id.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockSession {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl WhatsAppSession for MockSession {
        async fn connect(&self, _show_qr: bool) -> Result<bool, SessionError> {
            Ok(true)
        }

        async fn disconnect(&self, _logout: bool) {}

        fn is_connected(&self) -> bool {
            true
        }

        async fn send_message(&self, phone: &str, text: &str) -> Result<(), SessionError> {
            self.sent.lock().push((phone.to_string(), text.to_string()));
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
            let (sender, receiver) = broadcast::channel(1);
            drop(sender);
            receiver
        }

        async fn clear_auth(&self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        discord: Arc<MockDiscord>,
        session: Arc<MockSession>,
        channels: Arc<TicketChannelManager>,
        lifecycle: TicketLifecycle,
    }

    fn fixture_with(discord: MockDiscord, settings: InstanceSettings) -> Fixture {
        let dir = TempDir::new().expect("temp data dir");
        let store = Arc::new(ConfigStore::new(dir.path()).expect("config store"));
        let discord = Arc::new(discord);
        let session = Arc::new(MockSession::default());
        let transcripts = Arc::new(FileTranscriptManager::new(dir.path().join("transcripts")));
        let channels = Arc::new(TicketChannelManager::new("G1", store));
        let settings = Arc::new(RwLock::new(settings));

        let lifecycle = TicketLifecycle::new(
            "G1",
            "C1",
            discord.clone(),
            session.clone(),
            transcripts,
            channels.clone(),
            settings,
            TicketsConfig::default(),
            Duration::from_millis(10),
        );

        Fixture {
            _dir: dir,
            discord,
            session,
            channels,
            lifecycle,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockDiscord::default(), InstanceSettings::default())
    }

    #[tokio::test]
    async fn create_ticket_registers_mapping_and_sends_bootstrap() {
        let fx = fixture();

        let channel = fx
            .lifecycle
            .create_ticket("15551234567", "Alice")
            .await
            .expect("ticket created");

        assert_eq!(
            fx.channels.channel_id("15551234567").as_deref(),
            Some(channel.id.as_str())
        );
        assert!(!fx.channels.is_closed(&channel.id));
        assert_eq!(fx.channels.status(&channel.id), Some(TicketStatus::Open));

        let messages = fx.discord.messages.lock();
        // new-ticket marker, greeting, info message
        assert_eq!(messages.len(), 3);
        assert!(messages[0].1.contains("Alice"));
        assert_eq!(fx.discord.pinned.lock().len(), 1);
    }

    #[tokio::test]
    async fn create_ticket_reuses_open_ticket_for_same_phone() {
        let fx = fixture();

        let first = fx
            .lifecycle
            .create_ticket("15551234567", "Alice")
            .await
            .expect("first ticket");
        let second = fx
            .lifecycle
            .create_ticket("15551234567", "Alice")
            .await
            .expect("second call");

        assert_eq!(first.id, second.id);
        assert_eq!(fx.discord.created.lock().len(), 1);
    }

    #[tokio::test]
    async fn create_ticket_rejects_missing_inputs() {
        let fx = fixture();

        assert!(fx.lifecycle.create_ticket("", "Alice").await.is_err());
        assert!(fx.lifecycle.create_ticket("15551234567", "  ").await.is_err());
        assert!(fx.lifecycle.create_ticket("not-a-phone", "Alice").await.is_err());
    }

    #[tokio::test]
    async fn create_ticket_fails_when_category_is_missing() {
        let fx = fixture_with(
            MockDiscord {
                missing_category: true,
                ..Default::default()
            },
            InstanceSettings::default(),
        );

        let err = fx
            .lifecycle
            .create_ticket("15551234567", "Alice")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("category"));
        assert!(fx.channels.channel_id("15551234567").is_none());
    }

    #[tokio::test]
    async fn create_ticket_falls_back_to_simpler_creation() {
        let fx = fixture_with(
            MockDiscord {
                fail_modes: vec![ChannelCreation::FullPerms],
                ..Default::default()
            },
            InstanceSettings::default(),
        );

        fx.lifecycle
            .create_ticket("15551234567", "Alice")
            .await
            .expect("ticket created on fallback");

        let created = fx.discord.created.lock();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].1, ChannelCreation::NoPerms);
    }

    #[tokio::test]
    async fn create_ticket_bare_fallback_moves_channel_afterwards() {
        let fx = fixture_with(
            MockDiscord {
                fail_modes: vec![ChannelCreation::FullPerms, ChannelCreation::NoPerms],
                ..Default::default()
            },
            InstanceSettings::default(),
        );

        let channel = fx
            .lifecycle
            .create_ticket("15551234567", "Alice")
            .await
            .expect("ticket created bare");

        assert_eq!(fx.discord.created.lock()[0].1, ChannelCreation::Bare);
        let moved = fx.discord.moved.lock();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].0, channel.id);
    }

    #[tokio::test]
    async fn create_ticket_survives_pin_denial() {
        let fx = fixture_with(
            MockDiscord {
                fail_pin: true,
                ..Default::default()
            },
            InstanceSettings::default(),
        );

        fx.lifecycle
            .create_ticket("15551234567", "Alice")
            .await
            .expect("pin denial is degraded, not fatal");
        assert!(fx.discord.pinned.lock().is_empty());
    }

    #[tokio::test]
    async fn close_ticket_walks_the_state_machine() {
        let fx = fixture();
        let channel = fx
            .lifecycle
            .create_ticket("15551234567", "Alice")
            .await
            .expect("ticket created");

        let outcome = fx
            .lifecycle
            .close_ticket(&channel.id, "moderator")
            .await
            .expect("close succeeds");
        assert_eq!(outcome, CloseOutcome::Closed);
        assert_eq!(fx.channels.status(&channel.id), Some(TicketStatus::Closed));
        assert!(fx.channels.channel_id("15551234567").is_none());

        // No closing message unless explicitly enabled.
        assert!(fx.session.sent.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fx.discord.deleted.lock().as_slice(), &[channel.id.clone()]);
    }

    #[tokio::test]
    async fn close_ticket_sends_closing_message_when_enabled() {
        let fx = fixture_with(
            MockDiscord::default(),
            InstanceSettings {
                send_closing_message: Some(true),
                closing_message: Some("bye {name}".to_string()),
                ..Default::default()
            },
        );
        let channel = fx
            .lifecycle
            .create_ticket("15551234567", "Alice")
            .await
            .expect("ticket created");

        fx.lifecycle
            .close_ticket(&channel.id, "moderator")
            .await
            .expect("close succeeds");

        let sent = fx.session.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "15551234567");
    }

    #[tokio::test]
    async fn concurrent_close_deletes_exactly_once() {
        let fx = fixture();
        let channel = fx
            .lifecycle
            .create_ticket("15551234567", "Alice")
            .await
            .expect("ticket created");

        let (first, second) = tokio::join!(
            fx.lifecycle.close_ticket(&channel.id, "moderator"),
            fx.lifecycle.close_ticket(&channel.id, "moderator"),
        );
        let outcomes = [first.expect("first close"), second.expect("second close")];
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == CloseOutcome::Closed)
                .count(),
            1,
            "exactly one caller wins the close"
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fx.discord.deleted.lock().len(), 1);
    }

    #[tokio::test]
    async fn close_ticket_on_unmapped_channel_is_a_noop() {
        let fx = fixture();

        let outcome = fx
            .lifecycle
            .close_ticket("999", "moderator")
            .await
            .expect("close returns");
        assert_eq!(outcome, CloseOutcome::NotATicket);
        assert!(fx.discord.deleted.lock().is_empty());
    }

    #[tokio::test]
    async fn reopened_ticket_attaches_previous_transcript() {
        let fx = fixture();

        let first = fx
            .lifecycle
            .create_ticket("15551234567", "Alice")
            .await
            .expect("first ticket");
        fx.lifecycle
            .close_ticket(&first.id, "moderator")
            .await
            .expect("close first ticket");

        let second = fx
            .lifecycle
            .create_ticket("15551234567", "Alice")
            .await
            .expect("reopened ticket");
        assert_ne!(first.id, second.id);

        let files = fx.discord.files.lock();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, second.id);
        assert_eq!(files[0].1, "previous_transcript.txt");
    }

    #[tokio::test]
    async fn restore_flushes_in_sequence_order() {
        let fx = fixture();
        let channel = fx
            .lifecycle
            .create_ticket("15551234567", "Alice")
            .await
            .expect("ticket created");

        let bootstrap_count = fx.discord.messages.lock().len();

        fx.lifecycle.begin_restore(&channel.id);
        assert!(fx.lifecycle.is_restoring(&channel.id));
        fx.lifecycle
            .queue_restored_message(&channel.id, 1, "second".to_string());
        fx.lifecycle
            .queue_restored_message(&channel.id, 0, "first".to_string());

        let flushed = fx.lifecycle.finish_restore(&channel.id).await;
        assert_eq!(flushed, 2);
        assert!(!fx.lifecycle.is_restoring(&channel.id));

        let messages = fx.discord.messages.lock();
        let restored: Vec<&str> = messages[bootstrap_count..]
            .iter()
            .map(|(_, content)| content.as_str())
            .collect();
        assert_eq!(restored, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn custom_templates_reach_the_channel() {
        let fx = fixture_with(
            MockDiscord::default(),
            InstanceSettings {
                new_ticket_message: Some("ticket from {name} at {phoneNumber}".to_string()),
                welcome_message: Some("welcome {name}".to_string()),
                ..Default::default()
            },
        );

        fx.lifecycle
            .create_ticket("15551234567", "Alice")
            .await
            .expect("ticket created");

        let messages = fx.discord.messages.lock();
        assert_eq!(messages[0].1, "ticket from Alice at 15551234567");
        assert_eq!(messages[1].1, "welcome Alice");
    }
}
