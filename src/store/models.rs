use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Minimal identity record kept in the global `instance_configs.json` index.
/// Deliberately excludes message templates and feature flags so the shared
/// index stays small and holds nothing an operator edits per instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceIdentity {
    pub guild_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vouch_channel_id: Option<String>,
}

/// Per-instance settings file (`instances/<id>/settings.json`).
///
/// Every field is optional so the same type doubles as a partial update:
/// `merge` lets present fields win while absent ones are retained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vouch_channel_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub welcome_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intro_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reopen_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_ticket_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closing_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vouch_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vouch_success_message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcripts_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vouch_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_closing_message: Option<bool>,

    /// Whole-map replacement on merge; `None` leaves the stored map untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub special_channels: Option<HashMap<String, SpecialChannel>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialChannel {
    pub message: String,
}

impl InstanceSettings {
    /// Shallow-merge `patch` over `self`: present keys win, absent keys stay.
    pub fn merge(&mut self, patch: &InstanceSettings) {
        merge_field(&mut self.category_id, &patch.category_id);
        merge_field(&mut self.transcript_channel_id, &patch.transcript_channel_id);
        merge_field(&mut self.vouch_channel_id, &patch.vouch_channel_id);
        merge_field(&mut self.welcome_message, &patch.welcome_message);
        merge_field(&mut self.intro_message, &patch.intro_message);
        merge_field(&mut self.reopen_message, &patch.reopen_message);
        merge_field(&mut self.new_ticket_message, &patch.new_ticket_message);
        merge_field(&mut self.closing_message, &patch.closing_message);
        merge_field(&mut self.vouch_message, &patch.vouch_message);
        merge_field(&mut self.vouch_success_message, &patch.vouch_success_message);
        merge_field(&mut self.transcripts_enabled, &patch.transcripts_enabled);
        merge_field(&mut self.vouch_enabled, &patch.vouch_enabled);
        merge_field(&mut self.send_closing_message, &patch.send_closing_message);
        merge_field(&mut self.special_channels, &patch.special_channels);
    }

    /// True if the patch carries any of the identity fields mirrored into the
    /// global index.
    pub fn has_identity_fields(&self) -> bool {
        self.category_id.is_some()
            || self.transcript_channel_id.is_some()
            || self.vouch_channel_id.is_some()
    }

    /// True if any field at all is set.
    pub fn is_empty(&self) -> bool {
        *self == InstanceSettings::default()
    }
}

fn merge_field<T: Clone>(current: &mut Option<T>, patch: &Option<T>) {
    if let Some(value) = patch {
        *current = Some(value.clone());
    }
}

/// Per-channel ticket state, persisted in `instances/<id>/ticket_status.json`.
///
/// `Closed` is terminal; the Discord channel is deleted shortly after, at
/// which point the id stops mattering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Closing,
    Closed,
}

impl TicketStatus {
    /// A ticket mid-close must not be treated as active either.
    pub fn counts_as_closed(self) -> bool {
        matches!(self, TicketStatus::Closing | TicketStatus::Closed)
    }
}
