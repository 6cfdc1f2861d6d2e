use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use super::models::{InstanceIdentity, InstanceSettings, TicketStatus};
use super::StoreError;

const INDEX_FILE: &str = "instance_configs.json";
const SETTINGS_FILE: &str = "settings.json";
const TICKET_STATUS_FILE: &str = "ticket_status.json";
const INSTANCES_DIR: &str = "instances";

/// Durable persistence for instance identity and custom settings.
///
/// Layout under the data directory:
/// - `instance_configs.json` — instanceId → identity index
/// - `instances/<id>/settings.json` — full custom settings
/// - `instances/<id>/ticket_status.json` — channelId → ticket status
///
/// Reads never fail: a missing or corrupt file reads as empty. Writes go
/// through a temp file and rename so a crash never leaves a truncated file.
pub struct ConfigStore {
    data_dir: PathBuf,
}

impl ConfigStore {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(data_dir.join(INSTANCES_DIR))?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn instance_dir(&self, instance_id: &str) -> PathBuf {
        self.data_dir.join(INSTANCES_DIR).join(instance_id)
    }

    pub fn ensure_instance_dir(&self, instance_id: &str) -> Result<PathBuf, StoreError> {
        let dir = self.instance_dir(instance_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Read the per-instance settings file. Missing or unparseable files are
    /// reported as empty settings, never as an error.
    pub fn load(&self, instance_id: &str) -> InstanceSettings {
        self.read_json_or_default(&self.instance_dir(instance_id).join(SETTINGS_FILE))
    }

    /// Read-merge-write the per-instance settings file, then mirror any
    /// identity fields present in `patch` into the global index. Template and
    /// flag fields never reach the index.
    pub fn save(&self, instance_id: &str, patch: &InstanceSettings) -> Result<(), StoreError> {
        let mut settings = self.load(instance_id);
        settings.merge(patch);

        let dir = self.ensure_instance_dir(instance_id)?;
        self.write_json_atomic(&dir.join(SETTINGS_FILE), &settings)?;
        debug!(instance_id, "saved instance settings");

        if patch.has_identity_fields() {
            let mut index = self.read_index();
            let entry = index
                .entry(instance_id.to_string())
                .or_insert_with(|| InstanceIdentity {
                    guild_id: instance_id.to_string(),
                    ..Default::default()
                });
            if let Some(category_id) = &patch.category_id {
                entry.category_id = Some(category_id.clone());
            }
            if let Some(transcript_channel_id) = &patch.transcript_channel_id {
                entry.transcript_channel_id = Some(transcript_channel_id.clone());
            }
            if let Some(vouch_channel_id) = &patch.vouch_channel_id {
                entry.vouch_channel_id = Some(vouch_channel_id.clone());
            }
            self.write_json_atomic(&self.data_dir.join(INDEX_FILE), &index)?;
        }

        Ok(())
    }

    /// The global identity index, used for startup reconciliation.
    pub fn list_all(&self) -> HashMap<String, InstanceIdentity> {
        self.read_index()
    }

    pub fn get_identity(&self, instance_id: &str) -> Option<InstanceIdentity> {
        self.read_index().remove(instance_id)
    }

    pub fn upsert_identity(
        &self,
        instance_id: &str,
        identity: &InstanceIdentity,
    ) -> Result<(), StoreError> {
        let mut index = self.read_index();
        index.insert(instance_id.to_string(), identity.clone());
        self.write_json_atomic(&self.data_dir.join(INDEX_FILE), &index)
    }

    pub fn remove_identity(&self, instance_id: &str) -> Result<(), StoreError> {
        let mut index = self.read_index();
        if index.remove(instance_id).is_some() {
            self.write_json_atomic(&self.data_dir.join(INDEX_FILE), &index)?;
        }
        Ok(())
    }

    pub fn load_ticket_statuses(&self, instance_id: &str) -> HashMap<String, TicketStatus> {
        self.read_json_or_default(&self.instance_dir(instance_id).join(TICKET_STATUS_FILE))
    }

    pub fn save_ticket_statuses(
        &self,
        instance_id: &str,
        statuses: &HashMap<String, TicketStatus>,
    ) -> Result<(), StoreError> {
        let dir = self.ensure_instance_dir(instance_id)?;
        self.write_json_atomic(&dir.join(TICKET_STATUS_FILE), statuses)
    }

    /// Delete everything an instance persisted, including session auth
    /// material in its working directory. Used by full-cleanup disconnect.
    pub fn remove_instance_files(&self, instance_id: &str) -> Result<(), StoreError> {
        let dir = self.instance_dir(instance_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    fn read_index(&self) -> HashMap<String, InstanceIdentity> {
        self.read_json_or_default(&self.data_dir.join(INDEX_FILE))
    }

    fn read_json_or_default<T>(&self, path: &Path) -> T
    where
        T: serde::de::DeserializeOwned + Default,
    {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return T::default(),
            Err(err) => {
                warn!("failed to read {}: {err}", path.display());
                return T::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(err) => {
                warn!("failed to parse {}: {err}", path.display());
                T::default()
            }
        }
    }

    /// Serialize fully, write to a sibling temp file, then rename over the
    /// target. The old file is only replaced once the new content is on disk.
    fn write_json_atomic<T: serde::Serialize>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
        fs::write(&tmp, &content)?;
        if let Err(err) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::ConfigStore;
    use crate::store::models::{InstanceIdentity, InstanceSettings, TicketStatus};

    fn store() -> (TempDir, ConfigStore) {
        let dir = TempDir::new().expect("temp data dir");
        let store = ConfigStore::new(dir.path()).expect("config store");
        (dir, store)
    }

    #[test]
    fn load_returns_empty_settings_for_missing_instance() {
        let (_dir, store) = store();
        assert!(store.load("I1").is_empty());
    }

    #[test]
    fn load_returns_empty_settings_for_corrupt_file() {
        let (_dir, store) = store();
        let instance_dir = store.ensure_instance_dir("I1").expect("instance dir");
        std::fs::write(instance_dir.join("settings.json"), b"{not json").expect("write corrupt");

        assert!(store.load("I1").is_empty());
    }

    #[test]
    fn save_merges_rather_than_overwrites() {
        let (_dir, store) = store();

        store
            .save(
                "I1",
                &InstanceSettings {
                    welcome_message: Some("hello".to_string()),
                    ..Default::default()
                },
            )
            .expect("first save");
        store
            .save(
                "I1",
                &InstanceSettings {
                    closing_message: Some("bye".to_string()),
                    ..Default::default()
                },
            )
            .expect("second save");

        let settings = store.load("I1");
        assert_eq!(settings.welcome_message.as_deref(), Some("hello"));
        assert_eq!(settings.closing_message.as_deref(), Some("bye"));
    }

    #[test]
    fn save_mirrors_identity_fields_into_index() {
        let (_dir, store) = store();

        store
            .save(
                "I1",
                &InstanceSettings {
                    transcript_channel_id: Some("T1".to_string()),
                    welcome_message: Some("hello".to_string()),
                    ..Default::default()
                },
            )
            .expect("save");

        let index = store.list_all();
        let identity = index.get("I1").expect("index entry");
        assert_eq!(identity.transcript_channel_id.as_deref(), Some("T1"));

        // settings.json carries the identity field too
        let settings = store.load("I1");
        assert_eq!(settings.transcript_channel_id.as_deref(), Some("T1"));
    }

    #[test]
    fn index_never_contains_template_or_flag_keys() {
        let (_dir, store) = store();

        store
            .save(
                "I1",
                &InstanceSettings {
                    category_id: Some("C1".to_string()),
                    welcome_message: Some("hello".to_string()),
                    send_closing_message: Some(true),
                    ..Default::default()
                },
            )
            .expect("save");

        let raw = std::fs::read_to_string(store.data_dir().join("instance_configs.json"))
            .expect("index file");
        let parsed: serde_json::Value = serde_json::from_str(&raw).expect("index json");
        let entry = parsed.get("I1").expect("entry");
        let keys: Vec<&String> = entry.as_object().expect("object").keys().collect();
        for key in keys {
            assert!(
                ["guild_id", "category_id", "transcript_channel_id", "vouch_channel_id"]
                    .contains(&key.as_str()),
                "unexpected index key {key}"
            );
        }
    }

    #[test]
    fn save_without_identity_fields_leaves_index_untouched() {
        let (_dir, store) = store();

        store
            .save(
                "I1",
                &InstanceSettings {
                    welcome_message: Some("hello".to_string()),
                    ..Default::default()
                },
            )
            .expect("save");

        assert!(store.list_all().is_empty());
    }

    #[test]
    fn identity_roundtrip_and_removal() {
        let (_dir, store) = store();
        let identity = InstanceIdentity {
            guild_id: "G1".to_string(),
            category_id: Some("C1".to_string()),
            ..Default::default()
        };

        store.upsert_identity("G1", &identity).expect("upsert");
        assert_eq!(store.get_identity("G1"), Some(identity));

        store.remove_identity("G1").expect("remove");
        assert!(store.get_identity("G1").is_none());
    }

    #[test]
    fn ticket_statuses_survive_reopen() {
        let (dir, store) = store();

        let mut statuses = HashMap::new();
        statuses.insert("chan-1".to_string(), TicketStatus::Closing);
        store
            .save_ticket_statuses("I1", &statuses)
            .expect("save statuses");

        let reopened = ConfigStore::new(dir.path()).expect("reopen store");
        let loaded = reopened.load_ticket_statuses("I1");
        assert_eq!(loaded.get("chan-1"), Some(&TicketStatus::Closing));
    }

    #[test]
    fn remove_instance_files_deletes_working_directory() {
        let (_dir, store) = store();
        store
            .save(
                "I1",
                &InstanceSettings {
                    welcome_message: Some("hello".to_string()),
                    ..Default::default()
                },
            )
            .expect("save");
        assert!(store.instance_dir("I1").exists());

        store.remove_instance_files("I1").expect("remove files");
        assert!(!store.instance_dir("I1").exists());
        assert!(store.load("I1").is_empty());
    }
}
