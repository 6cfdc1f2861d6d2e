use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::{debug, error, info};

use serenity::all::{
    ChannelId, Client as SerenityClient, Context as SerenityContext,
    CreateAttachment, CreateMessage, EventHandler as SerenityEventHandler, GatewayIntents,
    GuildId, Http, Message as SerenityMessage, MessageId, PermissionOverwrite,
    PermissionOverwriteType, Permissions, Ready, RoleId, UserId,
};
use serenity::builder::{CreateChannel, EditChannel};
use serenity::http::HttpError;
use serenity::model::channel::{Channel, ChannelType};
use tokio::sync::{oneshot, RwLock};

use crate::bridge::BridgeRouter;
use crate::config::Config;
use crate::discord::{ChannelCreation, CreatedChannel, DiscordApi, DiscordApiError};

const INITIAL_LOGIN_RETRY_SECONDS: u64 = 2;
const MAX_LOGIN_RETRY_SECONDS: u64 = 300;

/// Serenity-backed Discord client: owns the gateway task, exposes the HTTP
/// surface behind [`DiscordApi`], and forwards inbound guild messages to the
/// bridge router once one is bound.
#[derive(Clone)]
pub struct DiscordGateway {
    config: Arc<Config>,
    send_lock: Arc<tokio::sync::Mutex<()>>,
    login_state: Arc<tokio::sync::Mutex<LoginState>>,
    router: Arc<RwLock<Option<Arc<BridgeRouter>>>>,
    http: Arc<RwLock<Option<Arc<Http>>>>,
    bot_user_id: Arc<RwLock<Option<u64>>>,
}

#[derive(Default)]
struct LoginState {
    is_logged_in: bool,
    gateway_task: Option<tokio::task::JoinHandle<()>>,
}

struct ReadySignalHandler {
    ready_sender: Arc<tokio::sync::Mutex<Option<oneshot::Sender<()>>>>,
    http_sender: Arc<tokio::sync::Mutex<Option<oneshot::Sender<Arc<Http>>>>>,
    router: Arc<RwLock<Option<Arc<BridgeRouter>>>>,
    bot_user_id: Arc<RwLock<Option<u64>>>,
}

#[serenity::async_trait]
impl SerenityEventHandler for ReadySignalHandler {
    async fn ready(&self, ctx: SerenityContext, ready: Ready) {
        info!(
            "discord gateway ready as {} ({})",
            ready.user.name, ready.user.id
        );
        *self.bot_user_id.write().await = Some(ready.user.id.get());
        if let Some(sender) = self.ready_sender.lock().await.take() {
            let _ = sender.send(());
        }
        if let Some(sender) = self.http_sender.lock().await.take() {
            let _ = sender.send(ctx.http);
        }
    }

    async fn message(&self, _ctx: SerenityContext, msg: SerenityMessage) {
        if msg.author.bot {
            return;
        }

        let Some(guild_id) = msg.guild_id else {
            debug!("ignoring direct message from {}", msg.author.id);
            return;
        };

        let router = self.router.read().await.clone();
        let Some(router) = router else {
            debug!("ignoring discord message before router binding");
            return;
        };

        if let Err(err) = router
            .handle_discord_message(
                &guild_id.to_string(),
                &msg.channel_id.to_string(),
                &msg.author.name,
                &msg.content,
            )
            .await
        {
            error!("failed to handle discord message: {err}");
        }
    }
}

impl DiscordGateway {
    pub fn new(config: Arc<Config>) -> Self {
        info!("initializing discord gateway client");
        Self {
            config,
            send_lock: Arc::new(tokio::sync::Mutex::new(())),
            login_state: Arc::new(tokio::sync::Mutex::new(LoginState::default())),
            router: Arc::new(RwLock::new(None)),
            http: Arc::new(RwLock::new(None)),
            bot_user_id: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn set_router(&self, router: Arc<BridgeRouter>) {
        *self.router.write().await = Some(router);
    }

    pub async fn login(&self) -> Result<()> {
        let mut state = self.login_state.lock().await;
        if state.is_logged_in {
            return Ok(());
        }

        let intents = if self.config.auth.use_privileged_intents {
            GatewayIntents::all()
        } else {
            GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let (http_tx, http_rx) = oneshot::channel();
        let event_handler = ReadySignalHandler {
            ready_sender: Arc::new(tokio::sync::Mutex::new(Some(ready_tx))),
            http_sender: Arc::new(tokio::sync::Mutex::new(Some(http_tx))),
            router: self.router.clone(),
            bot_user_id: self.bot_user_id.clone(),
        };

        let mut gateway_client = SerenityClient::builder(&self.config.auth.bot_token, intents)
            .event_handler(event_handler)
            .await
            .map_err(|err| anyhow!("failed to build discord gateway client: {err}"))?;

        let gateway_task = tokio::spawn(async move {
            if let Err(err) = gateway_client.start_autosharded().await {
                error!("discord gateway stopped: {err}");
            }
        });

        match tokio::time::timeout(std::time::Duration::from_secs(30), ready_rx).await {
            Ok(Ok(())) => {
                state.is_logged_in = true;
                state.gateway_task = Some(gateway_task);
                info!("discord bot login succeeded and gateway is connected");

                if let Ok(Ok(http)) =
                    tokio::time::timeout(std::time::Duration::from_secs(5), http_rx).await
                {
                    *self.http.write().await = Some(http);
                }

                Ok(())
            }
            Ok(Err(_)) => {
                gateway_task.abort();
                Err(anyhow!(
                    "discord gateway exited before receiving Ready event"
                ))
            }
            Err(_) => {
                gateway_task.abort();
                Err(anyhow!("timed out waiting for discord Ready event"))
            }
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut retry_seconds = INITIAL_LOGIN_RETRY_SECONDS;

        loop {
            match self.login().await {
                Ok(()) => {
                    info!("discord client is ready");
                    return Ok(());
                }
                Err(err) => {
                    error!(
                        "failed to start discord client: {err}. retrying in {} seconds",
                        retry_seconds
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(retry_seconds)).await;
                    retry_seconds = (retry_seconds * 2).min(MAX_LOGIN_RETRY_SECONDS);
                }
            }
        }
    }

    pub async fn stop(&self) -> Result<()> {
        let mut state = self.login_state.lock().await;
        if !state.is_logged_in {
            return Ok(());
        }

        if let Some(gateway_task) = state.gateway_task.take() {
            gateway_task.abort();
            match gateway_task.await {
                Ok(()) => info!("discord gateway task exited"),
                Err(join_err) if join_err.is_cancelled() => {
                    info!("discord gateway task aborted")
                }
                Err(join_err) => {
                    error!("discord gateway task join error: {join_err}");
                }
            }
        }

        state.is_logged_in = false;
        info!("discord client stopped");
        Ok(())
    }

    async fn http(&self) -> Result<Arc<Http>, DiscordApiError> {
        self.http
            .read()
            .await
            .clone()
            .ok_or_else(|| DiscordApiError::Api("discord http client not available".to_string()))
    }

    async fn throttle(&self) -> tokio::sync::MutexGuard<'_, ()> {
        let guard = self.send_lock.lock().await;
        let delay = self.config.limits.discord_send_delay;
        if delay > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
        }
        guard
    }

    fn ticket_overwrites(&self, guild_id: u64, bot_user_id: Option<u64>) -> Vec<PermissionOverwrite> {
        // @everyone's role id equals the guild id.
        let mut overwrites = vec![PermissionOverwrite {
            allow: Permissions::empty(),
            deny: Permissions::VIEW_CHANNEL,
            kind: PermissionOverwriteType::Role(RoleId::new(guild_id)),
        }];
        if let Some(bot_id) = bot_user_id {
            overwrites.push(PermissionOverwrite {
                allow: Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES,
                deny: Permissions::empty(),
                kind: PermissionOverwriteType::Member(UserId::new(bot_id)),
            });
        }
        overwrites
    }
}

fn parse_id(what: &str, value: &str) -> Result<u64, DiscordApiError> {
    value
        .parse()
        .map_err(|_| DiscordApiError::Api(format!("invalid {what} id: {value}")))
}

fn classify_error(what: &str, err: serenity::Error) -> DiscordApiError {
    if let serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) = &err {
        return match response.status_code.as_u16() {
            403 => DiscordApiError::PermissionDenied(format!("{what}: {err}")),
            404 => DiscordApiError::NotFound(format!("{what}: {err}")),
            _ => DiscordApiError::Api(format!("{what}: {err}")),
        };
    }
    DiscordApiError::Api(format!("{what}: {err}"))
}

#[async_trait]
impl DiscordApi for DiscordGateway {
    async fn category_exists(
        &self,
        guild_id: &str,
        category_id: &str,
    ) -> Result<bool, DiscordApiError> {
        let guild_id_num = parse_id("guild", guild_id)?;
        let category_id_num = parse_id("category", category_id)?;
        let http = self.http().await?;

        match http.get_channel(ChannelId::new(category_id_num)).await {
            Ok(Channel::Guild(channel)) => Ok(channel.kind == ChannelType::Category
                && channel.guild_id == GuildId::new(guild_id_num)),
            Ok(_) => Ok(false),
            Err(serenity::Error::Http(HttpError::UnsuccessfulRequest(response)))
                if response.status_code.as_u16() == 404 =>
            {
                Ok(false)
            }
            Err(err) => Err(classify_error("fetch category", err)),
        }
    }

    async fn create_ticket_channel(
        &self,
        guild_id: &str,
        category_id: &str,
        name: &str,
        mode: ChannelCreation,
    ) -> Result<CreatedChannel, DiscordApiError> {
        let guild_id_num = parse_id("guild", guild_id)?;
        let category_id_num = parse_id("category", category_id)?;
        let http = self.http().await?;
        let bot_user_id = *self.bot_user_id.read().await;

        let mut builder = CreateChannel::new(name).kind(ChannelType::Text);
        if matches!(mode, ChannelCreation::FullPerms | ChannelCreation::NoPerms) {
            builder = builder.category(ChannelId::new(category_id_num));
        }
        if mode == ChannelCreation::FullPerms {
            builder = builder.permissions(self.ticket_overwrites(guild_id_num, bot_user_id));
        }

        let channel = GuildId::new(guild_id_num)
            .create_channel(&http, builder)
            .await
            .map_err(|err| classify_error("create ticket channel", err))?;

        debug!(
            "created ticket channel {} ({}) mode={:?}",
            channel.name, channel.id, mode
        );
        Ok(CreatedChannel {
            id: channel.id.to_string(),
            name: channel.name.clone(),
        })
    }

    async fn move_to_category(
        &self,
        channel_id: &str,
        category_id: &str,
    ) -> Result<(), DiscordApiError> {
        let channel_id_num = parse_id("channel", channel_id)?;
        let category_id_num = parse_id("category", category_id)?;
        let http = self.http().await?;

        ChannelId::new(channel_id_num)
            .edit(
                &http,
                EditChannel::new().category(Some(ChannelId::new(category_id_num))),
            )
            .await
            .map_err(|err| classify_error("move channel to category", err))?;
        Ok(())
    }

    async fn apply_ticket_overwrites(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<(), DiscordApiError> {
        let guild_id_num = parse_id("guild", guild_id)?;
        let channel_id_num = parse_id("channel", channel_id)?;
        let http = self.http().await?;
        let bot_user_id = *self.bot_user_id.read().await;

        for overwrite in self.ticket_overwrites(guild_id_num, bot_user_id) {
            ChannelId::new(channel_id_num)
                .create_permission(&http, overwrite)
                .await
                .map_err(|err| classify_error("apply ticket overwrite", err))?;
        }
        Ok(())
    }

    async fn delete_channel(&self, channel_id: &str) -> Result<(), DiscordApiError> {
        let channel_id_num = parse_id("channel", channel_id)?;
        let http = self.http().await?;

        ChannelId::new(channel_id_num)
            .delete(&http)
            .await
            .map_err(|err| classify_error("delete channel", err))?;
        info!("deleted ticket channel {}", channel_id);
        Ok(())
    }

    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<String, DiscordApiError> {
        let channel_id_num = parse_id("channel", channel_id)?;
        let _guard = self.throttle().await;
        let http = self.http().await?;

        let message = ChannelId::new(channel_id_num)
            .send_message(&http, CreateMessage::new().content(content))
            .await
            .map_err(|err| classify_error("send message", err))?;

        debug!(
            "sent message to channel {} message_id={}",
            channel_id, message.id
        );
        Ok(message.id.to_string())
    }

    async fn send_file(
        &self,
        channel_id: &str,
        data: &[u8],
        filename: &str,
    ) -> Result<String, DiscordApiError> {
        let channel_id_num = parse_id("channel", channel_id)?;
        let _guard = self.throttle().await;
        let http = self.http().await?;

        let attachment = CreateAttachment::bytes(data.to_vec(), filename);
        let message = ChannelId::new(channel_id_num)
            .send_message(&http, CreateMessage::new().add_file(attachment))
            .await
            .map_err(|err| classify_error("send file", err))?;

        debug!(
            "sent file {} to channel {} message_id={}",
            filename, channel_id, message.id
        );
        Ok(message.id.to_string())
    }

    async fn pin_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<(), DiscordApiError> {
        let channel_id_num = parse_id("channel", channel_id)?;
        let message_id_num = parse_id("message", message_id)?;
        let http = self.http().await?;

        ChannelId::new(channel_id_num)
            .pin(&http, MessageId::new(message_id_num))
            .await
            .map_err(|err| classify_error("pin message", err))?;
        Ok(())
    }
}
