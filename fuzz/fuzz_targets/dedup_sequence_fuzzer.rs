//! Fuzz target for the Deduplicator
//!
//! # Strategy
//!
//! - Arbitrary sequences of adds and lookups over a small id/sender/content
//!   alphabet, so collisions are frequent
//! - Clock advances spanning the fingerprint window and the TTL
//! - Tiny capacities to exercise eviction
//!
//! # Invariants
//!
//! - An id just added is a duplicate unless capacity eviction took it
//! - Entry count never exceeds capacity

#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use chatsync_core::{
    ChatMessage,
    config::DedupConfig,
    dedup::Deduplicator,
    message::{MessageKind, OutgoingMessage},
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum DedupOp {
    Add { id: u8, sender: u8, content: u8, timestamp: u16 },
    Check { id: u8, sender: u8, content: u8, timestamp: u16 },
    Advance { millis: u32 },
}

#[derive(Debug, Arbitrary)]
struct Input {
    capacity: u8,
    ops: Vec<DedupOp>,
}

fn message(id: u8, sender: u8, content: u8, timestamp: u16) -> ChatMessage {
    let outgoing = OutgoingMessage {
        room_id: "r".to_string(),
        sender_id: format!("u{}", sender % 4),
        sender_name: String::new(),
        content: format!("c{}", content % 4),
        kind: MessageKind::Text,
        reply_to: None,
    };
    ChatMessage::optimistic(format!("m{}", id % 16), outgoing, i64::from(timestamp))
}

fuzz_target!(|input: Input| {
    let max_entries = usize::from(input.capacity % 32) + 1;
    let config = DedupConfig { max_entries, ttl: Duration::from_secs(60), ..DedupConfig::default() };
    let mut dedup = Deduplicator::new(config);
    let mut now = Instant::now();

    for op in input.ops {
        match op {
            DedupOp::Add { id, sender, content, timestamp } => {
                let m = message(id, sender, content, timestamp);
                dedup.add_message(&m, now);
                // Only a full index may have evicted the message it just took.
                assert!(dedup.is_duplicate(&m) || dedup.len() == max_entries);
            },
            DedupOp::Check { id, sender, content, timestamp } => {
                let _ = dedup.is_duplicate(&message(id, sender, content, timestamp));
            },
            DedupOp::Advance { millis } => now += Duration::from_millis(u64::from(millis % 120_000)),
        }
        assert!(dedup.len() <= max_entries);
    }
});
