//! Per-room message cache.
//!
//! Holds confirmed and optimistic messages in ascending timestamp order.
//! Replacing an optimistic entry keeps its slot, so the UI's view of the room
//! does not reorder when a confirmation lands.

use crate::message::ChatMessage;

/// Timestamp-ordered messages for one room.
#[derive(Debug, Clone, Default)]
pub struct MessageCache {
    messages: Vec<ChatMessage>,
}

impl MessageCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages, oldest first.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of cached messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether a message with `id` is cached.
    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Message with `id`. `None` if not cached.
    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.position(id).map(|idx| &self.messages[idx])
    }

    /// Insert keeping timestamp order. Equal timestamps keep arrival order.
    pub fn insert(&mut self, message: ChatMessage) {
        let idx = self.messages.partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(idx, message);
    }

    /// Overwrite the entry with `id` in place. Returns whether it existed.
    pub fn replace(&mut self, id: &str, message: ChatMessage) -> bool {
        match self.position(id) {
            Some(idx) => {
                self.messages[idx] = message;
                true
            },
            None => false,
        }
    }

    /// Replace the entry with the same id, or insert it. Returns whether an
    /// entry was replaced.
    pub fn upsert(&mut self, message: ChatMessage) -> bool {
        let id = message.id.clone();
        if self.replace(&id, message.clone()) {
            return true;
        }
        self.insert(message);
        false
    }

    /// Remove the entry with `id`.
    pub fn remove(&mut self, id: &str) -> Option<ChatMessage> {
        self.position(id).map(|idx| self.messages.remove(idx))
    }

    /// Replace confirmed history with `history`, keeping optimistic entries.
    pub fn seed(&mut self, history: Vec<ChatMessage>) {
        let pending: Vec<ChatMessage> =
            self.messages.drain(..).filter(ChatMessage::is_temporary).collect();
        for message in history.into_iter().chain(pending) {
            self.insert(message);
        }
    }

    /// Merge an older page. Returns the messages that were not already
    /// cached, oldest first.
    pub fn merge_older(&mut self, page: Vec<ChatMessage>) -> Vec<ChatMessage> {
        let mut added = Vec::new();
        for message in page {
            if self.contains(&message.id) {
                continue;
            }
            self.insert(message.clone());
            added.push(message);
        }
        added.sort_by_key(|m| m.timestamp);
        added
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }
}
