//! Optimistic message ledger.
//!
//! Tracks local sends that are shown to the UI but not yet confirmed. A
//! confirmation can arrive two ways: the backend's insert response (matched by
//! temporary id) or the change-feed echo of the inserted row (matched by
//! sender, content and timestamp proximity). Whichever arrives first takes the
//! entry out of the ledger; the second finds nothing and is ignored.

use std::collections::HashMap;

use crate::{
    config::LedgerConfig,
    message::{ChatMessage, MessageId, RoomId, UserId},
};

/// A local send awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    /// Temporary id shown to the UI
    pub temp_id: MessageId,
    /// Room
    pub room_id: RoomId,
    /// Sender
    pub sender_id: UserId,
    /// Body
    pub content: String,
    /// Client timestamp (unix millis)
    pub timestamp: i64,
}

impl PendingSend {
    /// Ledger entry for an optimistic message.
    pub fn from_message(message: &ChatMessage) -> Self {
        Self {
            temp_id: message.id.clone(),
            room_id: message.room_id.clone(),
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
            timestamp: message.timestamp,
        }
    }

    fn distance(&self, confirmed: &ChatMessage) -> Option<u64> {
        if self.room_id != confirmed.room_id
            || self.sender_id != confirmed.sender_id
            || self.content != confirmed.content
        {
            return None;
        }
        Some(self.timestamp.abs_diff(confirmed.timestamp))
    }
}

/// Unconfirmed sends, grouped by room in send order.
#[derive(Debug, Clone, Default)]
pub struct OptimisticLedger {
    config: LedgerConfig,
    pending: HashMap<RoomId, Vec<PendingSend>>,
}

impl OptimisticLedger {
    /// Create an empty ledger.
    pub fn new(config: LedgerConfig) -> Self {
        Self { config, pending: HashMap::new() }
    }

    /// Track an optimistic message.
    pub fn register(&mut self, message: &ChatMessage) {
        self.pending
            .entry(message.room_id.clone())
            .or_default()
            .push(PendingSend::from_message(message));
    }

    /// Remove and return the pending send `confirmed` confirms.
    ///
    /// Candidates share room, sender and content, with timestamps within the
    /// reconcile window. The closest timestamp wins; ties go to the oldest
    /// send. `None` if nothing matches.
    pub fn match_confirmation(&mut self, confirmed: &ChatMessage) -> Option<PendingSend> {
        let window = u64::try_from(self.config.reconcile_window.as_millis()).unwrap_or(u64::MAX);
        let sends = self.pending.get_mut(&confirmed.room_id)?;

        let (idx, _) = sends
            .iter()
            .enumerate()
            .filter_map(|(idx, send)| send.distance(confirmed).map(|d| (idx, d)))
            .filter(|(_, d)| *d <= window)
            .min_by_key(|(idx, d)| (*d, *idx))?;

        let send = sends.remove(idx);
        if sends.is_empty() {
            self.pending.remove(&confirmed.room_id);
        }
        Some(send)
    }

    /// Remove and return the pending send with `temp_id`.
    pub fn take(&mut self, room_id: &str, temp_id: &str) -> Option<PendingSend> {
        let sends = self.pending.get_mut(room_id)?;
        let idx = sends.iter().position(|s| s.temp_id == temp_id)?;
        let send = sends.remove(idx);
        if sends.is_empty() {
            self.pending.remove(room_id);
        }
        Some(send)
    }

    /// Whether `temp_id` is still awaiting confirmation.
    pub fn contains(&self, room_id: &str, temp_id: &str) -> bool {
        self.pending.get(room_id).is_some_and(|sends| sends.iter().any(|s| s.temp_id == temp_id))
    }

    /// Pending sends in `room_id`.
    pub fn pending_count(&self, room_id: &str) -> usize {
        self.pending.get(room_id).map_or(0, Vec::len)
    }

    /// Forget every pending send in `room_id`.
    pub fn clear_room(&mut self, room_id: &str) {
        self.pending.remove(room_id);
    }
}
