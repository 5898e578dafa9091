//! Per-room activity tracking.
//!
//! Every inbound event or outbound operation on a room touches its
//! `last_activity`. A room that stays silent past the idle threshold is due
//! for a probe (a no-op presence write). While a probe is in flight the room
//! is not reported again.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use crate::{
    config::HealthConfig,
    env::Instant,
    message::RoomId,
    timers::{TimerKey, TimerPurpose, TimerRegistry},
};

/// Idle detection for joined rooms.
#[derive(Debug, Clone)]
pub struct HealthMonitor<I> {
    config: HealthConfig,
    timers: TimerRegistry<I>,
    last_activity: HashMap<RoomId, I>,
    probing: HashSet<RoomId>,
}

impl<I: Instant> HealthMonitor<I> {
    /// Create a monitor tracking no rooms.
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            timers: TimerRegistry::new(),
            last_activity: HashMap::new(),
            probing: HashSet::new(),
        }
    }

    /// Record activity on `room_id`, starting to track it if needed.
    pub fn touch(&mut self, room_id: &str, now: I) {
        self.last_activity.insert(room_id.to_string(), now);
        self.probing.remove(room_id);
        self.timers.arm(TimerKey::room(room_id, TimerPurpose::HealthProbe), now + self.config.idle_threshold);
    }

    /// Rooms that went idle by `now`. Each is marked as probing.
    pub fn due(&mut self, now: I) -> Vec<RoomId> {
        let mut due = Vec::new();
        for key in self.timers.drain_expired(now) {
            if self.last_activity.contains_key(&key.room_id) && self.probing.insert(key.room_id.clone()) {
                due.push(key.room_id);
            }
        }
        due
    }

    /// Probe of `room_id` succeeded.
    pub fn probe_succeeded(&mut self, room_id: &str, now: I) {
        if self.last_activity.contains_key(room_id) {
            self.touch(room_id, now);
        }
    }

    /// Probe of `room_id` failed. The room stays untouched until the caller
    /// rejoins it.
    pub fn probe_failed(&mut self, room_id: &str) {
        self.probing.remove(room_id);
    }

    /// Whether a probe of `room_id` is in flight.
    pub fn is_probing(&self, room_id: &str) -> bool {
        self.probing.contains(room_id)
    }

    /// Last activity on `room_id`. `None` if untracked.
    pub fn last_activity(&self, room_id: &str) -> Option<I> {
        self.last_activity.get(room_id).copied()
    }

    /// Time since the last activity on `room_id`. `None` if untracked.
    pub fn idle_for(&self, room_id: &str, now: I) -> Option<Duration> {
        self.last_activity(room_id).map(|at| now - at)
    }

    /// Stop tracking `room_id`.
    pub fn remove(&mut self, room_id: &str) {
        self.timers.cancel_room(room_id);
        self.last_activity.remove(room_id);
        self.probing.remove(room_id);
    }

    /// Tracked rooms.
    pub fn tracked(&self) -> usize {
        self.last_activity.len()
    }
}
