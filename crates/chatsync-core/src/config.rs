//! Engine configuration.
//!
//! Every timing and sizing policy the engine follows lives here, with defaults
//! matching the documented behavior. Structs derive serde so hosts can load
//! them from whatever config source they already have.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Interval between connection heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// First reconnection delay; doubles per failed attempt.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on a single reconnection delay.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Automatic reconnection attempts before giving up.
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Subscribe attempts per join.
pub const DEFAULT_JOIN_ATTEMPTS: u32 = 3;

/// Linear join backoff step (delay = step × attempt).
pub const DEFAULT_JOIN_BACKOFF_STEP: Duration = Duration::from_secs(1);

/// Upper bound on the join backoff.
pub const DEFAULT_JOIN_BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Time allowed for a subscribe call to confirm or fail.
pub const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Fingerprint matches closer than this are duplicates.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(1000);

/// Age after which a deduplicator entry is evictable.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(30 * 60);

/// Deduplicator capacity per room.
pub const DEFAULT_DEDUP_MAX_ENTRIES: usize = 500;

/// Timestamp distance within which a confirmation matches an optimistic send.
pub const DEFAULT_RECONCILE_WINDOW: Duration = Duration::from_secs(10);

/// Delay coalescing local typing starts.
pub const DEFAULT_TYPING_DEBOUNCE: Duration = Duration::from_millis(300);

/// Local typing indicator stops itself after this long.
pub const DEFAULT_TYPING_AUTO_STOP: Duration = Duration::from_secs(3);

/// Remote typing entries expire after this long without a refresh.
pub const DEFAULT_TYPING_REMOTE_EXPIRY: Duration = Duration::from_secs(5);

/// A room idle for longer than this is probed.
pub const DEFAULT_IDLE_PROBE_AFTER: Duration = Duration::from_secs(60);

/// Resolution of the engine's timer driver.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Exponential reconnection policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt
    pub base_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Attempts before the manager gives up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt, given how many attempts already failed.
    ///
    /// `base × 2^failed`, capped at `max_delay`.
    pub fn delay_for(&self, failed: u32) -> Duration {
        let factor = 1u32.checked_shl(failed).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Heartbeat schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval between liveness checks
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval: DEFAULT_HEARTBEAT_INTERVAL }
    }
}

/// Room join retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinPolicy {
    /// Subscribe attempts before the join fails
    pub max_attempts: u32,
    /// Linear backoff step
    pub backoff_step: Duration,
    /// Backoff cap
    pub backoff_cap: Duration,
    /// Per-attempt subscribe timeout
    pub subscribe_timeout: Duration,
}

impl Default for JoinPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_JOIN_ATTEMPTS,
            backoff_step: DEFAULT_JOIN_BACKOFF_STEP,
            backoff_cap: DEFAULT_JOIN_BACKOFF_CAP,
            subscribe_timeout: DEFAULT_SUBSCRIBE_TIMEOUT,
        }
    }
}

impl JoinPolicy {
    /// Delay after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt).min(self.backoff_cap)
    }
}

/// Deduplicator policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Fingerprint timestamp tolerance
    pub window: Duration,
    /// Entry lifetime
    pub ttl: Duration,
    /// Entries kept per room
    pub max_entries: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_DEDUP_WINDOW,
            ttl: DEFAULT_DEDUP_TTL,
            max_entries: DEFAULT_DEDUP_MAX_ENTRIES,
        }
    }
}

/// Optimistic ledger policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Confirmation timestamp tolerance
    pub reconcile_window: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { reconcile_window: DEFAULT_RECONCILE_WINDOW }
    }
}

/// Typing indicator timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingConfig {
    /// Local start debounce
    pub debounce: Duration,
    /// Local auto-stop after a broadcast start
    pub auto_stop: Duration,
    /// Remote entry lifetime without refresh
    pub remote_expiry: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_TYPING_DEBOUNCE,
            auto_stop: DEFAULT_TYPING_AUTO_STOP,
            remote_expiry: DEFAULT_TYPING_REMOTE_EXPIRY,
        }
    }
}

/// Room health policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Idle time before a room is probed
    pub idle_threshold: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { idle_threshold: DEFAULT_IDLE_PROBE_AFTER }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Reconnection backoff
    pub reconnect: ReconnectPolicy,
    /// Heartbeat schedule
    pub heartbeat: HeartbeatConfig,
    /// Join retries
    pub join: JoinPolicy,
    /// Deduplication
    pub dedup: DedupConfig,
    /// Optimistic reconciliation
    pub ledger: LedgerConfig,
    /// Typing indicators
    pub typing: TypingConfig,
    /// Room health checks
    pub health: HealthConfig,
    /// Timer driver resolution
    pub tick_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            heartbeat: HeartbeatConfig::default(),
            join: JoinPolicy::default(),
            dedup: DedupConfig::default(),
            ledger: LedgerConfig::default(),
            typing: TypingConfig::default(),
            health: HealthConfig::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

impl SyncConfig {
    /// Reject configurations the engine cannot honor.
    ///
    /// # Errors
    ///
    /// `SyncError::Config` naming the first offending setting.
    pub fn validate(&self) -> Result<(), SyncError> {
        let reject = |msg: &str| Err(SyncError::Config(msg.to_string()));

        if self.tick_interval.is_zero() {
            return reject("tick_interval must be non-zero");
        }
        if self.reconnect.max_attempts == 0 {
            return reject("reconnect.max_attempts must be at least 1");
        }
        if self.reconnect.base_delay > self.reconnect.max_delay {
            return reject("reconnect.base_delay exceeds reconnect.max_delay");
        }
        if self.join.max_attempts == 0 {
            return reject("join.max_attempts must be at least 1");
        }
        if self.heartbeat.interval.is_zero() {
            return reject("heartbeat.interval must be non-zero");
        }
        if self.dedup.max_entries == 0 {
            return reject("dedup.max_entries must be at least 1");
        }
        if self.typing.auto_stop >= self.typing.remote_expiry {
            return reject("typing.auto_stop must be shorter than typing.remote_expiry");
        }

        Ok(())
    }

    /// User-facing message shown once reconnection gives up.
    pub fn terminal_reconnect_message(&self) -> String {
        format!(
            "Unable to reconnect after {} attempts. Check your connection and retry.",
            self.reconnect.max_attempts
        )
    }
}
