//! Fingerprint deduplicator.
//!
//! One instance per room. A message is a duplicate when its id has been seen,
//! or when a message with the same sender, room and content was seen with a
//! timestamp within the configured window. The window tolerates redelivery of
//! id-less copies while still letting a user send "ok" twice a minute apart.
//!
//! # Eviction
//!
//! After every insert, entries older than the TTL (measured from insertion)
//! are dropped, then the oldest-timestamp entries until the cache fits its
//! capacity. Lookups never refresh an entry.

use std::collections::{BTreeMap, HashMap};

use tracing::trace;

use crate::{
    config::DedupConfig,
    env::Instant,
    message::{ChatMessage, MessageId, RoomId, UserId},
};

/// Content-derived identity of a message, independent of its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Sender
    pub sender_id: UserId,
    /// Room
    pub room_id: RoomId,
    /// Body
    pub content: String,
}

impl Fingerprint {
    /// Fingerprint of `message`.
    pub fn of(message: &ChatMessage) -> Self {
        Self {
            sender_id: message.sender_id.clone(),
            room_id: message.room_id.clone(),
            content: message.content.clone(),
        }
    }
}

/// Position in the eviction order: message timestamp, then insertion sequence.
type Slot = (i64, u64);

#[derive(Debug, Clone)]
struct Entry<I> {
    id: MessageId,
    fingerprint: Fingerprint,
    inserted_at: I,
}

/// Per-room duplicate detector.
#[derive(Debug, Clone)]
pub struct Deduplicator<I> {
    config: DedupConfig,
    entries: BTreeMap<Slot, Entry<I>>,
    by_id: HashMap<MessageId, Slot>,
    by_fingerprint: HashMap<Fingerprint, Vec<Slot>>,
    next_seq: u64,
}

impl<I: Instant> Deduplicator<I> {
    /// Create an empty deduplicator.
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            entries: BTreeMap::new(),
            by_id: HashMap::new(),
            by_fingerprint: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Whether `message` has already been observed.
    pub fn is_duplicate(&self, message: &ChatMessage) -> bool {
        if self.by_id.contains_key(&message.id) {
            return true;
        }

        let window = u64::try_from(self.config.window.as_millis()).unwrap_or(u64::MAX);
        self.by_fingerprint
            .get(&Fingerprint::of(message))
            .is_some_and(|slots| slots.iter().any(|(ts, _)| ts.abs_diff(message.timestamp) <= window))
    }

    /// Record `message`, then evict expired and excess entries.
    ///
    /// Recording an id that is already indexed is a no-op apart from eviction.
    pub fn add_message(&mut self, message: &ChatMessage, now: I) {
        if !self.by_id.contains_key(&message.id) {
            let slot = (message.timestamp, self.next_seq);
            self.next_seq += 1;

            let fingerprint = Fingerprint::of(message);
            self.by_fingerprint.entry(fingerprint.clone()).or_default().push(slot);
            self.by_id.insert(message.id.clone(), slot);
            self.entries.insert(slot, Entry { id: message.id.clone(), fingerprint, inserted_at: now });
        }

        self.evict(now);
    }

    /// Number of indexed messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_id.clear();
        self.by_fingerprint.clear();
    }

    fn evict(&mut self, now: I) {
        let ttl = self.config.ttl;
        let expired: Vec<Slot> = self
            .entries
            .iter()
            .filter(|(_, entry)| now - entry.inserted_at > ttl)
            .map(|(slot, _)| *slot)
            .collect();
        for slot in expired {
            self.remove_slot(slot);
        }

        while self.entries.len() > self.config.max_entries {
            let Some(oldest) = self.entries.keys().next().copied() else {
                break;
            };
            self.remove_slot(oldest);
        }
    }

    fn remove_slot(&mut self, slot: Slot) {
        let Some(entry) = self.entries.remove(&slot) else {
            return;
        };
        trace!(id = %entry.id, "evicting dedup entry");

        self.by_id.remove(&entry.id);
        if let Some(slots) = self.by_fingerprint.get_mut(&entry.fingerprint) {
            slots.retain(|s| *s != slot);
            if slots.is_empty() {
                self.by_fingerprint.remove(&entry.fingerprint);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::message::{DeliveryStatus, MessageKind};

    fn msg(id: &str, content: &str, ts: i64) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            room_id: "r1".into(),
            sender_id: "u1".into(),
            sender_name: "Ada".into(),
            content: content.into(),
            kind: MessageKind::Text,
            timestamp: ts,
            is_read: false,
            status: DeliveryStatus::Sent,
            reply_to: None,
            reactions: Vec::new(),
        }
    }

    #[test]
    fn same_id_is_duplicate() {
        let now = Instant::now();
        let mut dedup = Deduplicator::new(DedupConfig::default());
        let m = msg("m1", "hi", 1_000);

        assert!(!dedup.is_duplicate(&m));
        dedup.add_message(&m, now);
        assert!(dedup.is_duplicate(&m));
        dedup.add_message(&m, now);
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn fingerprint_window_boundaries() {
        let now = Instant::now();
        let mut dedup = Deduplicator::new(DedupConfig::default());
        dedup.add_message(&msg("m1", "hi", 10_000), now);

        assert!(dedup.is_duplicate(&msg("m2", "hi", 10_999)));
        assert!(dedup.is_duplicate(&msg("m2", "hi", 11_000)));
        assert!(dedup.is_duplicate(&msg("m2", "hi", 9_000)));
        assert!(!dedup.is_duplicate(&msg("m2", "hi", 11_001)));
        assert!(!dedup.is_duplicate(&msg("m2", "hello", 10_000)));
    }

    #[test]
    fn evicts_oldest_timestamp_beyond_capacity() {
        let now = Instant::now();
        let config = DedupConfig { max_entries: 2, ..DedupConfig::default() };
        let mut dedup = Deduplicator::new(config);

        dedup.add_message(&msg("new", "a", 30_000), now);
        dedup.add_message(&msg("old", "b", 10_000), now);
        dedup.add_message(&msg("mid", "c", 20_000), now);

        assert_eq!(dedup.len(), 2);
        assert!(!dedup.is_duplicate(&msg("old", "b", 10_000)));
        assert!(dedup.is_duplicate(&msg("new", "a", 30_000)));
        assert!(dedup.is_duplicate(&msg("mid", "c", 20_000)));
    }

    #[test]
    fn evicts_entries_past_ttl() {
        let t0 = Instant::now();
        let config = DedupConfig { ttl: Duration::from_secs(60), ..DedupConfig::default() };
        let mut dedup = Deduplicator::new(config);

        dedup.add_message(&msg("m1", "a", 1), t0);
        dedup.add_message(&msg("m2", "b", 2), t0 + Duration::from_secs(61));

        assert_eq!(dedup.len(), 1);
        assert!(!dedup.is_duplicate(&msg("m1", "a", 1)));
    }

    #[test]
    fn lookups_do_not_refresh() {
        let now = Instant::now();
        let config = DedupConfig { max_entries: 1, ..DedupConfig::default() };
        let mut dedup = Deduplicator::new(config);

        dedup.add_message(&msg("m1", "a", 1), now);
        assert!(dedup.is_duplicate(&msg("m1", "a", 1)));
        dedup.add_message(&msg("m2", "b", 2), now);
        assert!(!dedup.is_duplicate(&msg("m1", "a", 1)));
    }
}
