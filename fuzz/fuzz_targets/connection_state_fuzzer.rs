//! Fuzz target for ConnectionManager
//!
//! Drives the connection state machine with arbitrary interleavings of
//! heartbeat results, reconnect outcomes, manual reconnects and clock
//! advances.
//!
//! # Invariants
//!
//! - Attempt counter never exceeds the configured ceiling
//! - Once exhausted, ticks never start another attempt
//! - A reported delay until the next action is never longer than the
//!   heartbeat interval or the maximum backoff

#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use chatsync_core::{ConnectionAction, ConnectionManager, SyncConfig};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum ConnOp {
    Connected,
    HeartbeatOk,
    HeartbeatFailed,
    ReconnectFailed,
    ForceReconnect,
    Disconnect,
    Advance { millis: u16 },
}

fuzz_target!(|ops: Vec<ConnOp>| {
    let config = SyncConfig::default();
    let mut conn = ConnectionManager::new(&config);
    let mut now = Instant::now();
    conn.begin_connect();

    for op in ops {
        match op {
            ConnOp::Connected => conn.connected(now),
            ConnOp::HeartbeatOk => conn.heartbeat_ok(now),
            ConnOp::HeartbeatFailed => conn.heartbeat_failed("fuzz", now),
            ConnOp::ReconnectFailed => conn.reconnect_failed("fuzz", now),
            ConnOp::ForceReconnect => {
                let _ = conn.force_reconnect();
            },
            ConnOp::Disconnect => conn.disconnect(),
            ConnOp::Advance { millis } => now += Duration::from_millis(u64::from(millis) * 10),
        }

        let exhausted = conn.is_exhausted();
        let actions = conn.tick(now);
        if exhausted {
            assert!(!actions.iter().any(|a| matches!(a, ConnectionAction::Reconnect { .. })));
        }
        assert!(conn.snapshot().reconnect_attempts <= config.reconnect.max_attempts);

        if let Some(wait) = conn.time_until_next(now) {
            assert!(wait <= config.heartbeat.interval.max(config.reconnect.max_delay));
        }
    }
});
