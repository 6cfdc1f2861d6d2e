use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::store::{ConfigStore, TicketStatus};

/// Phone↔channel mapping plus the per-channel ticket status state machine.
///
/// Statuses are persisted on every transition so a crash mid-close does not
/// lose the `closing` marker; the mapping itself is in-memory and rebuilt as
/// messages arrive. The `closing` set is the concurrency guard: all checks
/// and mutations happen inside one lock so two racing close triggers cannot
/// both pass `try_begin_closing`.
pub struct TicketChannelManager {
    instance_id: String,
    store: Arc<ConfigStore>,
    inner: Mutex<MappingState>,
}

#[derive(Default)]
struct MappingState {
    phone_to_channel: HashMap<String, String>,
    channel_to_phone: HashMap<String, String>,
    statuses: HashMap<String, TicketStatus>,
    closing: HashSet<String>,
}

impl TicketChannelManager {
    pub fn new(instance_id: &str, store: Arc<ConfigStore>) -> Self {
        let statuses = store.load_ticket_statuses(instance_id);
        Self {
            instance_id: instance_id.to_string(),
            store,
            inner: Mutex::new(MappingState {
                statuses,
                ..Default::default()
            }),
        }
    }

    /// Associate a phone number with a ticket channel. Stale associations on
    /// either side are dropped first so each phone maps to at most one
    /// channel and vice versa.
    pub fn set_mapping(&self, phone: &str, channel_id: &str) {
        let mut state = self.inner.lock();
        if let Some(old_channel) = state.phone_to_channel.remove(phone) {
            state.channel_to_phone.remove(&old_channel);
        }
        if let Some(old_phone) = state.channel_to_phone.remove(channel_id) {
            state.phone_to_channel.remove(&old_phone);
        }
        state
            .phone_to_channel
            .insert(phone.to_string(), channel_id.to_string());
        state
            .channel_to_phone
            .insert(channel_id.to_string(), phone.to_string());
        debug!(
            instance_id = %self.instance_id,
            phone, channel_id, "registered ticket mapping"
        );
    }

    pub fn remove_mapping(&self, phone: &str) -> Option<String> {
        let mut state = self.inner.lock();
        let channel_id = state.phone_to_channel.remove(phone)?;
        state.channel_to_phone.remove(&channel_id);
        Some(channel_id)
    }

    /// Remove a phone's mapping only while it still points at `channel_id`.
    /// A message that arrives mid-close can have already remapped the phone
    /// to a fresh ticket; that newer mapping must survive the old close.
    pub fn remove_mapping_for_channel(&self, phone: &str, channel_id: &str) -> bool {
        let mut state = self.inner.lock();
        if state.phone_to_channel.get(phone).map(String::as_str) == Some(channel_id) {
            state.phone_to_channel.remove(phone);
            state.channel_to_phone.remove(channel_id);
            true
        } else {
            state.channel_to_phone.remove(channel_id);
            false
        }
    }

    pub fn channel_id(&self, phone: &str) -> Option<String> {
        self.inner.lock().phone_to_channel.get(phone).cloned()
    }

    pub fn phone(&self, channel_id: &str) -> Option<String> {
        self.inner.lock().channel_to_phone.get(channel_id).cloned()
    }

    pub fn status(&self, channel_id: &str) -> Option<TicketStatus> {
        self.inner.lock().statuses.get(channel_id).copied()
    }

    /// Durably record a status transition. Backward transitions are refused:
    /// a ticket only ever moves `open → closing → closed`.
    pub fn set_status(&self, channel_id: &str, status: TicketStatus) {
        let snapshot = {
            let mut state = self.inner.lock();
            let current = state.statuses.get(channel_id).copied();
            if let Some(current) = current {
                let backward = match (current, status) {
                    (TicketStatus::Closed, TicketStatus::Closed) => false,
                    (TicketStatus::Closed, _) => true,
                    (TicketStatus::Closing, TicketStatus::Open) => true,
                    _ => false,
                };
                if backward {
                    warn!(
                        instance_id = %self.instance_id,
                        channel_id,
                        ?current,
                        requested = ?status,
                        "refusing backward ticket status transition"
                    );
                    return;
                }
            }
            state.statuses.insert(channel_id.to_string(), status);
            state.statuses.clone()
        };

        if let Err(err) = self.store.save_ticket_statuses(&self.instance_id, &snapshot) {
            warn!(
                instance_id = %self.instance_id,
                channel_id, "failed to persist ticket status: {err}"
            );
        }
    }

    /// True iff the channel must not be treated as an active ticket — a
    /// ticket mid-close must not accept newly routed messages either.
    pub fn is_closed(&self, channel_id: &str) -> bool {
        self.inner
            .lock()
            .statuses
            .get(channel_id)
            .is_some_and(|status| status.counts_as_closed())
    }

    /// Atomic check-and-set guarding the close flow. Returns false if the
    /// channel is already closing or closed; otherwise marks it `closing`
    /// (durably) and returns true. Check and insert happen under one lock so
    /// concurrent callers cannot both observe "not closing".
    pub fn try_begin_closing(&self, channel_id: &str) -> bool {
        let snapshot = {
            let mut state = self.inner.lock();
            if state.closing.contains(channel_id) {
                return false;
            }
            if state
                .statuses
                .get(channel_id)
                .is_some_and(|status| status.counts_as_closed())
            {
                return false;
            }
            state.closing.insert(channel_id.to_string());
            state
                .statuses
                .insert(channel_id.to_string(), TicketStatus::Closing);
            state.statuses.clone()
        };

        if let Err(err) = self.store.save_ticket_statuses(&self.instance_id, &snapshot) {
            // The in-memory guard still holds; only crash durability is lost.
            warn!(
                instance_id = %self.instance_id,
                channel_id, "failed to persist closing marker: {err}"
            );
        }
        true
    }

    /// Drop the in-memory closing guard once the close flow has finished,
    /// whatever its outcome. Keeping the guard forever would lock the channel
    /// id out of any future close attempt.
    pub fn release_closing_guard(&self, channel_id: &str) {
        self.inner.lock().closing.remove(channel_id);
    }
}
