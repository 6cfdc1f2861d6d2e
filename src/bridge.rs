use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::discord::DiscordApi;
use crate::instance::{Instance, InstanceManager, InstanceStatus};
use crate::media::MediaHandler;
use crate::store::InstanceSettings;
use crate::utils::formatting::substitute_channel_mentions;
use crate::whatsapp::SessionEvent;

/// Routes traffic between the two networks: WhatsApp session events into
/// ticket channels (creating tickets as contacts appear) and staff replies
/// from ticket channels back to the contact's phone.
pub struct BridgeRouter {
    instances: Arc<InstanceManager>,
    discord: Arc<dyn DiscordApi>,
    media: MediaHandler,
}

impl BridgeRouter {
    pub fn new(instances: Arc<InstanceManager>, discord: Arc<dyn DiscordApi>) -> Self {
        Self {
            instances,
            discord,
            media: MediaHandler::new(),
        }
    }

    /// Pump one instance's session events until the session goes away.
    /// Returns `None` for temporary instances, which have no session.
    pub fn spawn_session_pump(
        self: Arc<Self>,
        instance: Arc<Instance>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let session = instance.session()?.clone();
        let mut events = session.subscribe();
        let router = self;
        Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => router.handle_session_event(&instance, event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            instance_id = %instance.instance_id,
                            skipped, "session event stream lagged"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(instance_id = %instance.instance_id, "session event pump ended");
        }))
    }

    async fn handle_session_event(&self, instance: &Arc<Instance>, event: SessionEvent) {
        match event {
            SessionEvent::Message {
                phone,
                text,
                attachments,
            } => {
                if let Err(err) = self
                    .handle_whatsapp_message(instance, &phone, &text, &attachments)
                    .await
                {
                    error!(
                        instance_id = %instance.instance_id,
                        %phone, "failed to route whatsapp message: {err}"
                    );
                }
            }
            SessionEvent::HistoryMessage {
                phone,
                text,
                sequence,
            } => {
                if let Err(err) = self
                    .handle_history_message(instance, &phone, &text, sequence)
                    .await
                {
                    error!(
                        instance_id = %instance.instance_id,
                        %phone, "failed to queue history message: {err}"
                    );
                }
            }
            SessionEvent::HistorySyncComplete { phone } => {
                if let Err(err) = self.handle_history_complete(instance, &phone).await {
                    error!(
                        instance_id = %instance.instance_id,
                        %phone, "failed to flush history: {err}"
                    );
                }
            }
            SessionEvent::Ready => {
                instance.set_status(InstanceStatus::Active);
                info!(instance_id = %instance.instance_id, "whatsapp session ready");
            }
            SessionEvent::Disconnected => {
                instance.set_status(InstanceStatus::Inactive);
                info!(instance_id = %instance.instance_id, "whatsapp session disconnected");
            }
            // Pairing codes surface through the instance manager's QR flow.
            SessionEvent::Qr(_) => {}
        }
    }

    /// Route an inbound WhatsApp message to its ticket channel, opening one
    /// if the contact has none. Channels that are closing or closed never
    /// receive routed messages.
    pub async fn handle_whatsapp_message(
        &self,
        instance: &Arc<Instance>,
        phone: &str,
        text: &str,
        attachments: &[String],
    ) -> Result<()> {
        let lifecycle = self.routable_lifecycle(instance)?;

        let channel = lifecycle.create_ticket(phone, phone).await?;

        if lifecycle.is_restoring(&channel.id) {
            let sequence = lifecycle.next_restore_sequence(&channel.id);
            lifecycle.queue_restored_message(&channel.id, sequence, text.to_string());
            return Ok(());
        }

        lifecycle.record_transcript_line(&channel.id, phone, text).await;
        self.discord
            .send_message(&channel.id, text)
            .await
            .map_err(|err| anyhow!("failed to forward message to discord: {err}"))?;

        for url in attachments {
            if let Err(err) = self.relay_attachment(&channel.id, url).await {
                warn!(channel_id = %channel.id, %url, "failed to relay attachment: {err}");
            }
        }
        Ok(())
    }

    async fn handle_history_message(
        &self,
        instance: &Arc<Instance>,
        phone: &str,
        text: &str,
        sequence: u64,
    ) -> Result<()> {
        let lifecycle = self.routable_lifecycle(instance)?;
        let channel = lifecycle.create_ticket(phone, phone).await?;

        if !lifecycle.is_restoring(&channel.id) {
            lifecycle.begin_restore(&channel.id);
        }
        lifecycle.queue_restored_message(&channel.id, sequence, text.to_string());
        Ok(())
    }

    async fn handle_history_complete(&self, instance: &Arc<Instance>, phone: &str) -> Result<()> {
        let lifecycle = self.routable_lifecycle(instance)?;
        let Some(channel_id) = lifecycle.channels().channel_id(phone) else {
            return Ok(());
        };
        lifecycle.finish_restore(&channel_id).await;
        Ok(())
    }

    /// Relay a staff reply from a ticket channel to the contact. Messages in
    /// channels with no ticket mapping, or in tickets already closing, are
    /// ignored.
    pub async fn handle_discord_message(
        &self,
        guild_id: &str,
        channel_id: &str,
        author: &str,
        content: &str,
    ) -> Result<()> {
        let Some(instance) = self.instances.get_by_guild_id(guild_id).await else {
            debug!(guild_id, "message from guild with no instance, ignoring");
            return Ok(());
        };
        let Ok(lifecycle) = self.routable_lifecycle(&instance) else {
            return Ok(());
        };
        let Some(session) = instance.session() else {
            return Ok(());
        };

        let Some(phone) = lifecycle.channels().phone(channel_id) else {
            return Ok(());
        };
        if lifecycle.channels().is_closed(channel_id) {
            debug!(channel_id, "ignoring reply into a closing ticket");
            return Ok(());
        }

        let settings = instance.settings.read().await.clone();
        let outbound = apply_special_channels(content, &settings);

        lifecycle
            .record_transcript_line(channel_id, author, content)
            .await;
        session
            .send_message(&phone, &outbound)
            .await
            .map_err(|err| anyhow!("failed to forward reply to whatsapp: {err}"))?;
        Ok(())
    }

    fn routable_lifecycle<'a>(
        &self,
        instance: &'a Arc<Instance>,
    ) -> Result<&'a Arc<crate::tickets::TicketLifecycle>> {
        if instance.temporary {
            bail!("temporary instance must not route messages");
        }
        instance
            .lifecycle()
            .ok_or_else(|| anyhow!("instance has no ticket lifecycle"))
    }

    async fn relay_attachment(&self, channel_id: &str, url: &str) -> Result<()> {
        let media = self.media.download_from_url(url).await?;
        MediaHandler::check_discord_file_size(media.size)?;
        self.discord
            .send_file(channel_id, &media.data, &media.filename)
            .await
            .map_err(|err| anyhow!("failed to upload attachment: {err}"))?;
        Ok(())
    }
}

/// Replace mentions of configured special channels with their snippet before
/// the text leaves for WhatsApp.
fn apply_special_channels(content: &str, settings: &InstanceSettings) -> String {
    let Some(map) = &settings.special_channels else {
        return content.to_string();
    };
    substitute_channel_mentions(content, |id| map.get(id).map(|c| c.message.clone()))
}
