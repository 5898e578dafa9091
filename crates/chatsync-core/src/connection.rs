//! Connection and reconnection state machine.
//!
//! Owns the process-wide [`ConnectionStatus`], the heartbeat schedule and the
//! reconnection backoff. Uses the action pattern: [`ConnectionManager::tick`]
//! takes the current time and returns what the driver should do; the driver
//! reports outcomes back (`heartbeat_ok`, `reconnect_failed`, ...).
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ begin_connect ┌────────────┐ connected ┌───────────┐
//! │ Disconnected │──────────────>│ Connecting │──────────>│ Connected │
//! └──────────────┘               └────────────┘           └───────────┘
//!                                   ↑      │                    │
//!                        backoff    │      │ reconnect_failed   │ heartbeat_failed
//!                        elapsed    │      ↓                    ↓
//!                                 ┌───────────────────────────────┐
//!                                 │             Error             │
//!                                 └───────────────────────────────┘
//! ```
//!
//! After `max_attempts` consecutive failed reconnects the manager stays in
//! `Error` with a terminal message and schedules nothing until
//! [`ConnectionManager::force_reconnect`].

use std::{fmt, sync::Arc, time::Duration};

use tracing::{debug, error, info, warn};

use crate::{
    config::{HeartbeatConfig, ReconnectPolicy, SyncConfig},
    env::Instant,
};

/// Process-wide connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Not connected and not trying
    Disconnected,
    /// Connection or reconnection attempt in progress
    Connecting,
    /// Transport reachable and identity valid
    Connected,
    /// Last attempt or heartbeat failed
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// What status listeners observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Current status
    pub status: ConnectionStatus,
    /// Error message, set while in [`ConnectionStatus::Error`]
    pub error: Option<String>,
    /// Reconnection attempts since the last successful connection
    pub reconnect_attempts: u32,
}

impl Default for ConnectionSnapshot {
    fn default() -> Self {
        Self { status: ConnectionStatus::Disconnected, error: None, reconnect_attempts: 0 }
    }
}

/// Actions returned by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Check transport liveness and identity, then report the outcome
    CheckHeartbeat,
    /// Re-establish the transport and rejoin every active room
    Reconnect {
        /// 1-based attempt number
        attempt: u32,
    },
}

/// Callback invoked on every status change.
pub type StatusListener = Arc<dyn Fn(&ConnectionSnapshot) + Send + Sync>;

/// Handle identifying a registered [`StatusListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Connection state machine.
///
/// Pure: no I/O, time passed in. Generic over `Instant` so tests can drive it
/// with virtual time.
pub struct ConnectionManager<I> {
    reconnect: ReconnectPolicy,
    heartbeat: HeartbeatConfig,
    terminal_message: String,
    snapshot: ConnectionSnapshot,
    next_heartbeat: Option<I>,
    next_reconnect: Option<I>,
    heartbeat_in_flight: bool,
    reconnect_in_flight: bool,
    last_heartbeat_ok: Option<I>,
    listeners: Vec<(ListenerId, StatusListener)>,
    next_listener: u64,
}

impl<I: Instant> fmt::Debug for ConnectionManager<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("snapshot", &self.snapshot)
            .field("next_heartbeat", &self.next_heartbeat)
            .field("next_reconnect", &self.next_reconnect)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl<I: Instant> ConnectionManager<I> {
    /// Create a manager in [`ConnectionStatus::Disconnected`].
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            reconnect: config.reconnect.clone(),
            heartbeat: config.heartbeat.clone(),
            terminal_message: config.terminal_reconnect_message(),
            snapshot: ConnectionSnapshot::default(),
            next_heartbeat: None,
            next_reconnect: None,
            heartbeat_in_flight: false,
            reconnect_in_flight: false,
            last_heartbeat_ok: None,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> &ConnectionSnapshot {
        &self.snapshot
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        self.snapshot.status
    }

    /// Last successful connection or heartbeat. `None` if never connected.
    pub fn last_heartbeat_ok(&self) -> Option<I> {
        self.last_heartbeat_ok
    }

    /// Whether automatic reconnection has given up.
    pub fn is_exhausted(&self) -> bool {
        self.snapshot.status == ConnectionStatus::Error
            && self.next_reconnect.is_none()
            && !self.reconnect_in_flight
            && self.snapshot.reconnect_attempts >= self.reconnect.max_attempts
    }

    /// Whether a reconnection attempt is scheduled or running.
    pub fn is_reconnecting(&self) -> bool {
        self.next_reconnect.is_some() || self.reconnect_in_flight
    }

    /// Register a status listener. Listeners fire in registration order.
    pub fn add_listener(&mut self, listener: StatusListener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Unregister a listener. Returns whether it was registered.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Initial connection started.
    pub fn begin_connect(&mut self) {
        self.set(ConnectionStatus::Connecting, None, self.snapshot.reconnect_attempts);
    }

    /// Transport connected and identity verified.
    ///
    /// Resets the attempt counter and starts the heartbeat schedule.
    pub fn connected(&mut self, now: I) {
        info!("connection established");
        self.next_reconnect = None;
        self.reconnect_in_flight = false;
        self.heartbeat_in_flight = false;
        self.next_heartbeat = Some(now + self.heartbeat.interval);
        self.last_heartbeat_ok = Some(now);
        self.set(ConnectionStatus::Connected, None, 0);
    }

    /// Initial connection failed. Nothing is retried automatically.
    pub fn connect_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%reason, "connection failed");
        self.set(ConnectionStatus::Error, Some(reason), self.snapshot.reconnect_attempts);
    }

    /// Heartbeat check passed.
    pub fn heartbeat_ok(&mut self, now: I) {
        if !self.heartbeat_in_flight {
            return;
        }
        self.heartbeat_in_flight = false;
        self.last_heartbeat_ok = Some(now);
        if self.snapshot.status == ConnectionStatus::Connected {
            self.next_heartbeat = Some(now + self.heartbeat.interval);
        }
    }

    /// Heartbeat check failed. Enters `Error` and schedules reconnection.
    pub fn heartbeat_failed(&mut self, reason: impl Into<String>, now: I) {
        if !self.heartbeat_in_flight {
            return;
        }
        self.heartbeat_in_flight = false;
        self.next_heartbeat = None;

        let reason = reason.into();
        warn!(%reason, "heartbeat failed");
        self.set(ConnectionStatus::Error, Some(reason), self.snapshot.reconnect_attempts);
        self.schedule_reconnect(now);
    }

    /// A reconnection attempt failed.
    ///
    /// Schedules the next attempt with exponential backoff, or gives up with
    /// the terminal message once the attempt ceiling is reached.
    pub fn reconnect_failed(&mut self, reason: impl Into<String>, now: I) {
        if !self.reconnect_in_flight {
            return;
        }
        self.reconnect_in_flight = false;

        let reason = reason.into();
        let attempts = self.snapshot.reconnect_attempts;
        if attempts >= self.reconnect.max_attempts {
            error!(attempts, %reason, "reconnection attempts exhausted");
            self.next_reconnect = None;
            self.set(ConnectionStatus::Error, Some(self.terminal_message.clone()), attempts);
            return;
        }

        warn!(attempt = attempts, %reason, "reconnection attempt failed");
        self.set(ConnectionStatus::Error, Some(reason), attempts);
        self.schedule_reconnect(now);
    }

    /// Manual reconnection: resets the attempt counter and attempts now.
    ///
    /// `None` if an attempt is already running; its outcome is then judged
    /// against the reset counter.
    pub fn force_reconnect(&mut self) -> Option<ConnectionAction> {
        info!("manual reconnect requested");
        self.next_reconnect = None;
        self.next_heartbeat = None;
        self.heartbeat_in_flight = false;

        if self.reconnect_in_flight {
            self.set(self.snapshot.status, self.snapshot.error.clone(), 0);
            return None;
        }

        Some(self.start_attempt(0))
    }

    /// Connection torn down on request.
    pub fn disconnect(&mut self) {
        self.next_heartbeat = None;
        self.next_reconnect = None;
        self.heartbeat_in_flight = false;
        self.reconnect_in_flight = false;
        self.set(ConnectionStatus::Disconnected, None, 0);
    }

    /// Due actions at `now`.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if self.snapshot.status == ConnectionStatus::Connected
            && !self.heartbeat_in_flight
            && self.next_heartbeat.is_some_and(|at| at <= now)
        {
            self.next_heartbeat = None;
            self.heartbeat_in_flight = true;
            actions.push(ConnectionAction::CheckHeartbeat);
        }

        if !self.reconnect_in_flight && self.next_reconnect.is_some_and(|at| at <= now) {
            self.next_reconnect = None;
            actions.push(self.start_attempt(self.snapshot.reconnect_attempts));
        }

        actions
    }

    /// Time until the next scheduled action. `None` if nothing is scheduled.
    pub fn time_until_next(&self, now: I) -> Option<Duration> {
        let next = match (self.next_heartbeat, self.next_reconnect) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }?;
        Some(if next > now { next - now } else { Duration::ZERO })
    }

    fn start_attempt(&mut self, failed_so_far: u32) -> ConnectionAction {
        let attempt = failed_so_far + 1;
        self.reconnect_in_flight = true;
        debug!(attempt, "starting reconnection attempt");
        self.set(ConnectionStatus::Connecting, None, attempt);
        ConnectionAction::Reconnect { attempt }
    }

    fn schedule_reconnect(&mut self, now: I) {
        let delay = self.reconnect.delay_for(self.snapshot.reconnect_attempts);
        debug!(delay_ms = delay.as_millis() as u64, "scheduling reconnection");
        self.next_reconnect = Some(now + delay);
    }

    fn set(&mut self, status: ConnectionStatus, error: Option<String>, reconnect_attempts: u32) {
        let next = ConnectionSnapshot { status, error, reconnect_attempts };
        if next == self.snapshot {
            return;
        }
        self.snapshot = next;
        for (_, listener) in &self.listeners {
            listener(&self.snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Mutex,
        time::{Duration, Instant},
    };

    use super::*;

    fn recording(manager: &mut ConnectionManager<Instant>) -> Arc<Mutex<Vec<ConnectionSnapshot>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.add_listener(Arc::new(move |s: &ConnectionSnapshot| sink.lock().unwrap().push(s.clone())));
        seen
    }

    fn connected_manager(t0: Instant) -> ConnectionManager<Instant> {
        let mut manager = ConnectionManager::new(&SyncConfig::default());
        manager.begin_connect();
        manager.connected(t0);
        manager
    }

    /// Fail the heartbeat at `t0 + 30s` and return that instant.
    fn fail_heartbeat(manager: &mut ConnectionManager<Instant>, t0: Instant) -> Instant {
        let at = t0 + Duration::from_secs(30);
        assert_eq!(manager.tick(at), vec![ConnectionAction::CheckHeartbeat]);
        manager.heartbeat_failed("transport unreachable", at);
        at
    }

    #[test]
    fn heartbeat_every_interval() {
        let t0 = Instant::now();
        let mut manager = connected_manager(t0);

        assert!(manager.tick(t0 + Duration::from_secs(29)).is_empty());
        let at = t0 + Duration::from_secs(30);
        assert_eq!(manager.tick(at), vec![ConnectionAction::CheckHeartbeat]);
        assert!(manager.tick(at + Duration::from_secs(60)).is_empty());

        manager.heartbeat_ok(at);
        assert_eq!(manager.last_heartbeat_ok(), Some(at));
        assert_eq!(manager.tick(at + Duration::from_secs(30)), vec![ConnectionAction::CheckHeartbeat]);
    }

    #[test]
    fn backoff_ladder_then_terminal() {
        let t0 = Instant::now();
        let mut manager = connected_manager(t0);
        let mut now = fail_heartbeat(&mut manager, t0);
        assert_eq!(manager.status(), ConnectionStatus::Error);

        let mut delays = Vec::new();
        for expected_attempt in 1..=5 {
            let wait = manager.time_until_next(now).unwrap();
            delays.push(wait.as_secs());
            now += wait;
            assert_eq!(manager.tick(now), vec![ConnectionAction::Reconnect { attempt: expected_attempt }]);
            assert_eq!(manager.status(), ConnectionStatus::Connecting);
            manager.reconnect_failed("still down", now);
        }

        assert_eq!(delays, [1, 2, 4, 8, 16]);
        assert!(manager.is_exhausted());
        assert_eq!(manager.snapshot().reconnect_attempts, 5);
        assert!(manager.snapshot().error.as_deref().unwrap().contains("Unable to reconnect after 5 attempts"));
        assert!(manager.tick(now + Duration::from_secs(3600)).is_empty());
        assert_eq!(manager.time_until_next(now), None);
    }

    #[test]
    fn success_resets_counter() {
        let t0 = Instant::now();
        let mut manager = connected_manager(t0);
        let now = fail_heartbeat(&mut manager, t0) + Duration::from_secs(1);

        assert_eq!(manager.tick(now), vec![ConnectionAction::Reconnect { attempt: 1 }]);
        manager.connected(now);

        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert_eq!(manager.snapshot().reconnect_attempts, 0);
        assert!(!manager.is_reconnecting());
    }

    #[test]
    fn force_reconnect_after_exhaustion() {
        let t0 = Instant::now();
        let mut manager = connected_manager(t0);
        let mut now = fail_heartbeat(&mut manager, t0);
        while let Some(wait) = manager.time_until_next(now) {
            now += wait;
            for _ in manager.tick(now) {
                manager.reconnect_failed("down", now);
            }
        }
        assert!(manager.is_exhausted());

        assert_eq!(manager.force_reconnect(), Some(ConnectionAction::Reconnect { attempt: 1 }));
        assert_eq!(manager.snapshot().reconnect_attempts, 1);
        manager.reconnect_failed("down", now);
        assert_eq!(manager.time_until_next(now), Some(Duration::from_secs(2)));
    }

    #[test]
    fn force_reconnect_mid_attempt_notifies_reset() {
        let t0 = Instant::now();
        let mut manager = connected_manager(t0);
        let now = fail_heartbeat(&mut manager, t0) + Duration::from_secs(1);
        assert_eq!(manager.tick(now), vec![ConnectionAction::Reconnect { attempt: 1 }]);
        let seen = recording(&mut manager);

        assert_eq!(manager.force_reconnect(), None);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].status, ConnectionStatus::Connecting);
        assert_eq!(seen[0].reconnect_attempts, 0);
        assert!(manager.is_reconnecting());
    }

    #[test]
    fn listeners_fire_in_order_on_change_only() {
        let t0 = Instant::now();
        let mut manager = ConnectionManager::new(&SyncConfig::default());
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let order = Arc::clone(&order);
            manager.add_listener(Arc::new(move |_: &ConnectionSnapshot| order.lock().unwrap().push(tag)));
        }
        let seen = recording(&mut manager);

        manager.begin_connect();
        manager.begin_connect();
        manager.connected(t0);

        assert_eq!(*order.lock().unwrap(), ["first", "second", "first", "second"]);
        let statuses: Vec<_> = seen.lock().unwrap().iter().map(|s| s.status).collect();
        assert_eq!(statuses, [ConnectionStatus::Connecting, ConnectionStatus::Connected]);
    }

    #[test]
    fn removed_listener_is_silent() {
        let mut manager: ConnectionManager<Instant> = ConnectionManager::new(&SyncConfig::default());
        let seen = Arc::new(Mutex::new(0u32));
        let sink = Arc::clone(&seen);
        let id = manager.add_listener(Arc::new(move |_: &ConnectionSnapshot| *sink.lock().unwrap() += 1));

        assert!(manager.remove_listener(id));
        assert!(!manager.remove_listener(id));
        manager.begin_connect();
        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[test]
    fn stale_outcomes_are_ignored() {
        let t0 = Instant::now();
        let mut manager = connected_manager(t0);
        manager.heartbeat_failed("no heartbeat in flight", t0);
        manager.reconnect_failed("no attempt in flight", t0);
        assert_eq!(manager.status(), ConnectionStatus::Connected);
    }
}
