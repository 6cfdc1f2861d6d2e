use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::TicketsConfig;
use crate::discord::DiscordApi;
use crate::instance::setup::SetupStore;
use crate::store::{ConfigStore, InstanceIdentity, InstanceSettings};
use crate::tickets::{TicketChannelManager, TicketLifecycle};
use crate::transcript::FileTranscriptManager;
use crate::whatsapp::{SessionEvent, SessionFactory, WhatsAppSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Active,
    /// WhatsApp session intentionally torn down; identity and config kept.
    Inactive,
}

/// Outcome of a QR pairing attempt. The session may never resolve, so the
/// caller always learns which of the three things happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrOutcome {
    Qr(String),
    AlreadyConnected,
    TimedOut,
    NotConfigured,
}

#[derive(Debug, Clone)]
pub struct CreateInstanceOptions {
    pub guild_id: String,
    pub category_id: String,
    pub transcript_channel_id: Option<String>,
    pub vouch_channel_id: Option<String>,
    pub custom_settings: InstanceSettings,
}

/// One guild's bridge: identity, live settings, and (for live instances) the
/// WhatsApp session plus ticket lifecycle.
///
/// A temporary instance is a read-only reconstruction from storage used by
/// settings UIs before the session is live; it carries no session or
/// lifecycle and must never drive channel routing.
pub struct Instance {
    pub instance_id: String,
    pub guild_id: String,
    pub category_id: Option<String>,
    pub temporary: bool,
    pub settings: Arc<RwLock<InstanceSettings>>,
    state: parking_lot::RwLock<InstanceStatus>,
    session: Option<Arc<dyn WhatsAppSession>>,
    lifecycle: Option<Arc<TicketLifecycle>>,
}

impl Instance {
    fn temporary(instance_id: String, identity: InstanceIdentity, settings: InstanceSettings) -> Self {
        Self {
            instance_id,
            guild_id: identity.guild_id,
            category_id: identity.category_id,
            temporary: true,
            settings: Arc::new(RwLock::new(settings)),
            state: parking_lot::RwLock::new(InstanceStatus::Inactive),
            session: None,
            lifecycle: None,
        }
    }

    pub fn session(&self) -> Option<&Arc<dyn WhatsAppSession>> {
        self.session.as_ref()
    }

    pub fn lifecycle(&self) -> Option<&Arc<TicketLifecycle>> {
        self.lifecycle.as_ref()
    }

    pub fn status(&self) -> InstanceStatus {
        *self.state.read()
    }

    pub fn set_status(&self, status: InstanceStatus) {
        *self.state.write() = status;
    }
}

/// Authoritative guild→instance registry. All instance creation, settings
/// mutation, and connect/disconnect flows go through here.
pub struct InstanceManager {
    store: Arc<ConfigStore>,
    discord: Arc<dyn DiscordApi>,
    sessions: Arc<dyn SessionFactory>,
    defaults: TicketsConfig,
    qr_timeout: Duration,
    delete_delay: Duration,
    instances: RwLock<HashMap<String, Arc<Instance>>>,
    pub setup: SetupStore,
}

impl InstanceManager {
    pub fn new(
        store: Arc<ConfigStore>,
        discord: Arc<dyn DiscordApi>,
        sessions: Arc<dyn SessionFactory>,
        defaults: TicketsConfig,
        qr_timeout: Duration,
        delete_delay: Duration,
        setup_ttl: Duration,
    ) -> Self {
        Self {
            store,
            discord,
            sessions,
            defaults,
            qr_timeout,
            delete_delay,
            instances: RwLock::new(HashMap::new()),
            setup: SetupStore::new(setup_ttl),
        }
    }

    /// Resolve a guild's instance: live map by instance id first, then a
    /// linear scan on guild id (the two can diverge after migrations), then a
    /// non-live temporary view reconstructed from storage so read-only
    /// settings UIs keep working before the session is live.
    pub async fn get_by_guild_id(&self, guild_id: &str) -> Option<Arc<Instance>> {
        {
            let instances = self.instances.read().await;
            if let Some(instance) = instances.get(guild_id) {
                return Some(instance.clone());
            }
            if let Some(instance) = instances.values().find(|i| i.guild_id == guild_id) {
                return Some(instance.clone());
            }
        }

        let index = self.store.list_all();
        let (instance_id, identity) = index
            .into_iter()
            .find(|(id, identity)| id == guild_id || identity.guild_id == guild_id)?;
        let settings = self.store.load(&instance_id);
        debug!(guild_id, %instance_id, "serving temporary instance view from storage");
        Some(Arc::new(Instance::temporary(instance_id, identity, settings)))
    }

    /// Create (or return) the guild's instance. The guild id doubles as the
    /// instance id, so there is one instance per guild by construction.
    /// Identity goes to the global index; custom settings, when non-empty,
    /// go through the per-instance settings path.
    pub async fn create_instance(&self, options: CreateInstanceOptions) -> Result<Arc<Instance>> {
        let instance_id = options.guild_id.clone();

        {
            let instances = self.instances.read().await;
            if let Some(existing) = instances.get(&instance_id) {
                debug!(%instance_id, "instance already exists, returning it");
                return Ok(existing.clone());
            }
        }

        let identity = InstanceIdentity {
            guild_id: options.guild_id.clone(),
            category_id: Some(options.category_id.clone()),
            transcript_channel_id: options.transcript_channel_id.clone(),
            vouch_channel_id: options.vouch_channel_id.clone(),
        };

        self.store.upsert_identity(&instance_id, &identity)?;
        if !options.custom_settings.is_empty() {
            self.store.save(&instance_id, &options.custom_settings)?;
        }

        let instance = self.build_live_instance(&instance_id, &identity)?;

        let mut instances = self.instances.write().await;
        let entry = instances
            .entry(instance_id.clone())
            .or_insert_with(|| instance);
        info!(%instance_id, "instance created");
        Ok(entry.clone())
    }

    fn build_live_instance(
        &self,
        instance_id: &str,
        identity: &InstanceIdentity,
    ) -> Result<Arc<Instance>> {
        let dir = self.store.ensure_instance_dir(instance_id)?;
        let session = self.sessions.create(instance_id, &dir.join("auth"));
        let settings = Arc::new(RwLock::new(self.store.load(instance_id)));
        let channels = Arc::new(TicketChannelManager::new(instance_id, self.store.clone()));
        let transcripts = Arc::new(FileTranscriptManager::new(dir.join("transcripts")));

        let category_id = identity.category_id.clone().unwrap_or_default();
        let lifecycle = Arc::new(TicketLifecycle::new(
            &identity.guild_id,
            &category_id,
            self.discord.clone(),
            session.clone(),
            transcripts,
            channels,
            settings.clone(),
            self.defaults.clone(),
            self.delete_delay,
        ));

        Ok(Arc::new(Instance {
            instance_id: instance_id.to_string(),
            guild_id: identity.guild_id.clone(),
            category_id: identity.category_id.clone(),
            temporary: false,
            settings,
            state: parking_lot::RwLock::new(InstanceStatus::Inactive),
            session: Some(session),
            lifecycle: Some(lifecycle),
        }))
    }

    /// Merge a settings patch into storage and, when the instance is live,
    /// into its in-memory settings. Safe to call before the instance has ever
    /// connected. Returns false when the write failed.
    pub async fn save_instance_settings(&self, instance_id: &str, patch: &InstanceSettings) -> bool {
        if let Err(err) = self.store.save(instance_id, patch) {
            warn!(instance_id, "failed to persist instance settings: {err}");
            return false;
        }

        let instances = self.instances.read().await;
        if let Some(instance) = instances.get(instance_id) {
            instance.settings.write().await.merge(patch);
        }
        true
    }

    /// Tear down a guild's WhatsApp session.
    ///
    /// With `full_cleanup` the instance is removed entirely: live map entry,
    /// global index record, and on-disk working directory (auth material
    /// included). Without it, only the session goes away — auth material is
    /// cleared so the next connect re-pairs, but settings and ticket history
    /// stay.
    pub async fn disconnect(&self, guild_id: &str, full_cleanup: bool) -> bool {
        let instance = {
            let instances = self.instances.read().await;
            instances
                .get(guild_id)
                .cloned()
                .or_else(|| instances.values().find(|i| i.guild_id == guild_id).cloned())
        };
        let Some(instance) = instance else {
            return false;
        };

        if let Some(session) = instance.session() {
            session.disconnect(true).await;
        }

        if full_cleanup {
            self.instances.write().await.remove(&instance.instance_id);
            if let Err(err) = self.store.remove_identity(&instance.instance_id) {
                warn!(instance_id = %instance.instance_id, "failed to remove instance from index: {err}");
            }
            if let Err(err) = self.store.remove_instance_files(&instance.instance_id) {
                warn!(instance_id = %instance.instance_id, "failed to remove instance files: {err}");
            }
            info!(instance_id = %instance.instance_id, "instance fully removed");
        } else {
            if let Some(session) = instance.session() {
                if let Err(err) = session.clear_auth().await {
                    warn!(instance_id = %instance.instance_id, "failed to clear session auth material: {err}");
                }
            }
            instance.set_status(InstanceStatus::Inactive);
            info!(instance_id = %instance.instance_id, "whatsapp session disconnected, configuration kept");
        }
        true
    }

    /// Ask the guild's session for a fresh pairing QR code.
    pub async fn generate_qr_code(&self, guild_id: &str) -> QrOutcome {
        let Some(instance) = self.get_by_guild_id(guild_id).await else {
            return QrOutcome::NotConfigured;
        };
        let Some(session) = instance.session().cloned() else {
            // Temporary view: no live session to pair.
            return QrOutcome::NotConfigured;
        };

        if session.is_connected() {
            return QrOutcome::AlreadyConnected;
        }

        self.wait_for_qr(session).await
    }

    /// The only automatic retry in the system: try the existing auth material
    /// first, and only fall back to a fresh QR pairing if that fails.
    pub async fn reconnect(&self, guild_id: &str) -> QrOutcome {
        let Some(instance) = self.get_by_guild_id(guild_id).await else {
            return QrOutcome::NotConfigured;
        };
        let Some(session) = instance.session().cloned() else {
            return QrOutcome::NotConfigured;
        };

        if session.is_connected() {
            return QrOutcome::AlreadyConnected;
        }

        match session.connect(false).await {
            Ok(true) => {
                instance.set_status(InstanceStatus::Active);
                return QrOutcome::AlreadyConnected;
            }
            Ok(false) => {
                debug!(guild_id, "reconnect without pairing did not come up, requesting qr");
            }
            Err(err) => {
                debug!(guild_id, "reconnect without pairing failed ({err}), requesting qr");
            }
        }

        self.wait_for_qr(session).await
    }

    async fn wait_for_qr(&self, session: Arc<dyn WhatsAppSession>) -> QrOutcome {
        let mut events = session.subscribe();

        let connect_session = session.clone();
        tokio::spawn(async move {
            if let Err(err) = connect_session.connect(true).await {
                debug!("qr pairing connect attempt ended: {err}");
            }
        });

        let deadline = tokio::time::Instant::now() + self.qr_timeout;
        loop {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Ok(SessionEvent::Qr(code))) => return QrOutcome::Qr(code),
                Ok(Ok(SessionEvent::Ready)) => return QrOutcome::AlreadyConnected,
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => return QrOutcome::TimedOut,
                Err(_) => return QrOutcome::TimedOut,
            }
        }
    }

    /// Reconstruct every instance recorded in the index. Each instance tries
    /// its existing auth material (no fresh pairing); a failing instance is
    /// logged and skipped, never fatal to the loop. Returns how many sessions
    /// came up.
    pub async fn initialize_all_instances(&self) -> usize {
        let index = self.store.list_all();
        info!(count = index.len(), "initializing stored instances");

        let mut started = 0;
        for (instance_id, identity) in index {
            if self.instances.read().await.contains_key(&instance_id) {
                continue;
            }

            let instance = match self.build_live_instance(&instance_id, &identity) {
                Ok(instance) => instance,
                Err(err) => {
                    error!(%instance_id, "failed to reconstruct instance: {err}");
                    continue;
                }
            };
            self.instances
                .write()
                .await
                .insert(instance_id.clone(), instance.clone());

            if let Some(session) = instance.session() {
                match session.connect(false).await {
                    Ok(true) => {
                        instance.set_status(InstanceStatus::Active);
                        started += 1;
                    }
                    Ok(false) => {
                        warn!(%instance_id, "whatsapp session needs pairing before it can come up");
                    }
                    Err(err) => {
                        warn!(%instance_id, "failed to reconnect whatsapp session: {err}");
                    }
                }
            }
        }
        started
    }

    /// Stop every live session without touching auth material or config.
    /// Sessions go down concurrently; a slow instance never blocks the rest.
    pub async fn shutdown(&self) {
        let instances: Vec<Arc<Instance>> =
            self.instances.read().await.values().cloned().collect();
        futures::future::join_all(instances.iter().map(|instance| async move {
            if let Some(session) = instance.session() {
                session.disconnect(false).await;
            }
            instance.set_status(InstanceStatus::Inactive);
        }))
        .await;
        info!("all instances shut down");
    }

    pub async fn live_instances(&self) -> Vec<Arc<Instance>> {
        self.instances.read().await.values().cloned().collect()
    }
}
