use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::instance::manager::CreateInstanceOptions;
use crate::store::InstanceSettings;

/// Draft of an interactive setup flow, scoped to one guild. Drafts live only
/// for the duration of the flow: completing or cancelling removes them, and
/// abandoned drafts expire after the TTL.
#[derive(Debug, Clone)]
pub struct SetupSession {
    pub guild_id: String,
    pub category_id: Option<String>,
    pub transcript_channel_id: Option<String>,
    pub vouch_channel_id: Option<String>,
    pub custom_settings: InstanceSettings,
    started_at: Instant,
}

impl SetupSession {
    fn new(guild_id: &str) -> Self {
        Self {
            guild_id: guild_id.to_string(),
            category_id: None,
            transcript_channel_id: None,
            vouch_channel_id: None,
            custom_settings: InstanceSettings::default(),
            started_at: Instant::now(),
        }
    }

    /// Convert a finished draft into creation options. Requires a category —
    /// a setup with no category chosen is not completable.
    pub fn into_create_options(self) -> Option<CreateInstanceOptions> {
        let category_id = self.category_id?;
        Some(CreateInstanceOptions {
            guild_id: self.guild_id,
            category_id,
            transcript_channel_id: self.transcript_channel_id,
            vouch_channel_id: self.vouch_channel_id,
            custom_settings: self.custom_settings,
        })
    }
}

/// Guild-keyed registry of in-flight setup drafts. Each guild gets its own
/// slot; concurrent setups in different guilds never observe each other.
pub struct SetupStore {
    ttl: Duration,
    inner: Mutex<HashMap<String, SetupSession>>,
}

impl SetupStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Start (or restart) a setup draft for a guild.
    pub fn begin(&self, guild_id: &str) {
        self.inner
            .lock()
            .insert(guild_id.to_string(), SetupSession::new(guild_id));
    }

    /// Apply a selection step to a guild's draft. Returns false if no draft
    /// is active (expired or never started).
    pub fn update<F>(&self, guild_id: &str, apply: F) -> bool
    where
        F: FnOnce(&mut SetupSession),
    {
        let mut drafts = self.inner.lock();
        match drafts.get_mut(guild_id) {
            Some(draft) if draft.started_at.elapsed() <= self.ttl => {
                apply(draft);
                true
            }
            Some(_) => {
                drafts.remove(guild_id);
                false
            }
            None => false,
        }
    }

    /// Remove and return a guild's draft on completion.
    pub fn take(&self, guild_id: &str) -> Option<SetupSession> {
        let mut drafts = self.inner.lock();
        let draft = drafts.remove(guild_id)?;
        if draft.started_at.elapsed() > self.ttl {
            return None;
        }
        Some(draft)
    }

    pub fn cancel(&self, guild_id: &str) -> bool {
        self.inner.lock().remove(guild_id).is_some()
    }

    /// Drop abandoned drafts. Called periodically by the owning loop.
    pub fn purge_expired(&self) -> usize {
        let mut drafts = self.inner.lock();
        let before = drafts.len();
        drafts.retain(|_, draft| draft.started_at.elapsed() <= self.ttl);
        let purged = before - drafts.len();
        if purged > 0 {
            debug!(purged, "discarded expired setup drafts");
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::SetupStore;

    #[test]
    fn setup_flow_collects_selections_per_guild() {
        let store = SetupStore::new(Duration::from_secs(60));
        store.begin("G1");
        store.begin("G2");

        assert!(store.update("G1", |draft| draft.category_id = Some("C1".to_string())));
        assert!(store.update("G2", |draft| draft.category_id = Some("C2".to_string())));

        let draft = store.take("G1").expect("draft present");
        assert_eq!(draft.category_id.as_deref(), Some("C1"));

        // G2's draft is untouched by G1 completing.
        let other = store.take("G2").expect("other draft present");
        assert_eq!(other.category_id.as_deref(), Some("C2"));
    }

    #[test]
    fn take_consumes_the_draft() {
        let store = SetupStore::new(Duration::from_secs(60));
        store.begin("G1");

        assert!(store.take("G1").is_some());
        assert!(store.take("G1").is_none());
        assert!(!store.update("G1", |_| {}));
    }

    #[test]
    fn cancel_discards_the_draft() {
        let store = SetupStore::new(Duration::from_secs(60));
        store.begin("G1");

        assert!(store.cancel("G1"));
        assert!(!store.cancel("G1"));
    }

    #[test]
    fn expired_drafts_are_unusable_and_purged() {
        let store = SetupStore::new(Duration::from_millis(5));
        store.begin("G1");
        std::thread::sleep(Duration::from_millis(20));

        assert!(!store.update("G1", |_| {}));

        store.begin("G2");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.purge_expired(), 1);
        assert!(store.take("G2").is_none());
    }

    #[test]
    fn into_create_options_requires_a_category() {
        let store = SetupStore::new(Duration::from_secs(60));
        store.begin("G1");
        let draft = store.take("G1").expect("draft present");
        assert!(draft.into_create_options().is_none());

        store.begin("G2");
        store.update("G2", |draft| draft.category_id = Some("C1".to_string()));
        let options = store
            .take("G2")
            .expect("draft present")
            .into_create_options()
            .expect("complete draft converts");
        assert_eq!(options.guild_id, "G2");
        assert_eq!(options.category_id, "C1");
    }
}
