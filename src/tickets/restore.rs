use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;
use tracing::debug;

/// A message held back while a channel's history is being restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub sequence: u64,
    pub content: String,
}

/// Per-channel restoration buffer.
///
/// While a channel is restoring, incoming history messages are queued under
/// their transport sequence number and flushed in sequence order once
/// restoration completes — the transport may redeliver or reorder history on
/// reconnect, so network-arrival order cannot be trusted.
#[derive(Default)]
pub struct RestoreQueue {
    inner: Mutex<RestoreState>,
}

#[derive(Default)]
struct RestoreState {
    restoring: HashSet<String>,
    pending: HashMap<String, BTreeMap<u64, QueuedMessage>>,
    next_sequence: HashMap<String, u64>,
}

impl RestoreQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, channel_id: &str) {
        let mut state = self.inner.lock();
        if state.restoring.insert(channel_id.to_string()) {
            debug!(channel_id, "channel entered restoration");
        }
    }

    pub fn is_restoring(&self, channel_id: &str) -> bool {
        self.inner.lock().restoring.contains(channel_id)
    }

    /// Next locally-assigned sequence number for a channel, monotonically
    /// increasing. Used when the transport provides no ordering key of its
    /// own.
    pub fn next_sequence(&self, channel_id: &str) -> u64 {
        let mut state = self.inner.lock();
        let counter = state
            .next_sequence
            .entry(channel_id.to_string())
            .or_insert(0);
        let sequence = *counter;
        *counter += 1;
        sequence
    }

    /// Queue a restored message under its sequence number. Redelivered
    /// duplicates of an already-queued sequence are dropped. The local
    /// counter is kept ahead of every transport-assigned sequence so live
    /// messages queued mid-restore sort after the history seen so far.
    pub fn enqueue(&self, channel_id: &str, sequence: u64, content: String) {
        let mut state = self.inner.lock();
        let counter = state
            .next_sequence
            .entry(channel_id.to_string())
            .or_insert(0);
        *counter = (*counter).max(sequence + 1);
        state
            .pending
            .entry(channel_id.to_string())
            .or_default()
            .entry(sequence)
            .or_insert(QueuedMessage { sequence, content });
    }

    /// End restoration for a channel, draining its queue in sequence order.
    pub fn finish(&self, channel_id: &str) -> Vec<QueuedMessage> {
        let mut state = self.inner.lock();
        state.restoring.remove(channel_id);
        state.next_sequence.remove(channel_id);
        state
            .pending
            .remove(channel_id)
            .map(|queue| queue.into_values().collect())
            .unwrap_or_default()
    }
}
