//! Typed timer registry.
//!
//! Deadlines are keyed by a structured [`TimerKey`] so two logical timers can
//! never share a slot by accident, and re-arming a key replaces its previous
//! deadline. The registry only stores deadlines; the caller polls
//! [`TimerRegistry::drain_expired`] from its tick loop.

use std::collections::HashMap;

use crate::{
    env::Instant,
    message::{RoomId, UserId},
};

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerPurpose {
    /// Local typing start waiting out the debounce
    TypingDebounce,
    /// Local typing indicator stopping itself
    TypingAutoStop,
    /// Remote typing entry expiry
    TypingCleanup,
    /// Idle room probe
    HealthProbe,
}

/// Identity of a logical timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey {
    /// Owning room
    pub room_id: RoomId,
    /// User the timer concerns, if any
    pub user_id: Option<UserId>,
    /// Purpose
    pub purpose: TimerPurpose,
}

impl TimerKey {
    /// Key for a room-wide timer.
    pub fn room(room_id: impl Into<RoomId>, purpose: TimerPurpose) -> Self {
        Self { room_id: room_id.into(), user_id: None, purpose }
    }

    /// Key for a per-user timer.
    pub fn user(room_id: impl Into<RoomId>, user_id: impl Into<UserId>, purpose: TimerPurpose) -> Self {
        Self { room_id: room_id.into(), user_id: Some(user_id.into()), purpose }
    }
}

/// Deadlines keyed by [`TimerKey`].
#[derive(Debug, Clone)]
pub struct TimerRegistry<I> {
    deadlines: HashMap<TimerKey, I>,
}

impl<I> Default for TimerRegistry<I> {
    fn default() -> Self {
        Self { deadlines: HashMap::new() }
    }
}

impl<I: Instant> TimerRegistry<I> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `key` to fire at `deadline`, replacing any previous deadline.
    pub fn arm(&mut self, key: TimerKey, deadline: I) {
        self.deadlines.insert(key, deadline);
    }

    /// Cancel `key`. Returns whether it was armed.
    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        self.deadlines.remove(key).is_some()
    }

    /// Cancel every timer scoped to `room_id`.
    pub fn cancel_room(&mut self, room_id: &str) {
        self.deadlines.retain(|key, _| key.room_id != room_id);
    }

    /// Whether `key` is armed.
    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.deadlines.contains_key(key)
    }

    /// Deadline of `key`. `None` if not armed.
    pub fn deadline(&self, key: &TimerKey) -> Option<I> {
        self.deadlines.get(key).copied()
    }

    /// Number of armed timers.
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Whether no timers are armed.
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn drain_expired(&mut self, now: I) -> Vec<TimerKey> {
        let mut expired: Vec<(I, TimerKey)> = Vec::new();
        self.deadlines.retain(|key, deadline| {
            if *deadline <= now {
                expired.push((*deadline, key.clone()));
                false
            } else {
                true
            }
        });
        expired.sort();
        expired.into_iter().map(|(_, key)| key).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn rearm_replaces_deadline() {
        let t0 = Instant::now();
        let mut timers = TimerRegistry::new();
        let key = TimerKey::user("r1", "u1", TimerPurpose::TypingCleanup);

        timers.arm(key.clone(), t0 + Duration::from_secs(5));
        timers.arm(key.clone(), t0 + Duration::from_secs(10));

        assert_eq!(timers.len(), 1);
        assert!(timers.drain_expired(t0 + Duration::from_secs(6)).is_empty());
        assert_eq!(timers.drain_expired(t0 + Duration::from_secs(10)), vec![key]);
        assert!(timers.is_empty());
    }

    #[test]
    fn keys_with_same_parts_do_not_collide() {
        let t0 = Instant::now();
        let mut timers = TimerRegistry::new();
        timers.arm(TimerKey::user("a_b", "c", TimerPurpose::TypingCleanup), t0);
        timers.arm(TimerKey::user("a", "b_c", TimerPurpose::TypingCleanup), t0);
        assert_eq!(timers.len(), 2);
    }

    #[test]
    fn cancel_room_only_touches_that_room() {
        let t0 = Instant::now();
        let mut timers = TimerRegistry::new();
        timers.arm(TimerKey::room("r1", TimerPurpose::HealthProbe), t0);
        timers.arm(TimerKey::user("r1", "u1", TimerPurpose::TypingDebounce), t0);
        timers.arm(TimerKey::room("r2", TimerPurpose::HealthProbe), t0);

        timers.cancel_room("r1");

        assert_eq!(timers.len(), 1);
        assert!(timers.is_armed(&TimerKey::room("r2", TimerPurpose::HealthProbe)));
    }

    #[test]
    fn drains_in_deadline_order() {
        let t0 = Instant::now();
        let mut timers = TimerRegistry::new();
        let late = TimerKey::room("r1", TimerPurpose::HealthProbe);
        let early = TimerKey::room("r2", TimerPurpose::HealthProbe);
        timers.arm(late.clone(), t0 + Duration::from_millis(20));
        timers.arm(early.clone(), t0 + Duration::from_millis(10));

        assert_eq!(timers.drain_expired(t0 + Duration::from_secs(1)), vec![early, late]);
    }
}
