//! Typing indicator coordinator.
//!
//! Local side: a start signal is held for the debounce period so a burst of
//! keystrokes produces one broadcast; each broadcast start arms an auto-stop
//! so a client that vanishes mid-sentence does not leave a stale indicator.
//! Stop signals go out immediately and cancel both timers.
//!
//! Remote side: per-room map of typing users, each with its own cleanup timer
//! that outlives the sender's auto-stop to absorb network latency.
//!
//! Uses the action pattern: the engine executes [`TypingAction::Broadcast`]
//! over the room channel and delivers [`TypingAction::Emit`] to the room
//! observer.

use std::collections::{BTreeMap, HashMap};

use chatsync_proto::TypingPayload;
use tracing::debug;

use crate::{
    config::TypingConfig,
    env::Instant,
    message::{RoomId, TypingUser, UserId},
    timers::{TimerKey, TimerPurpose, TimerRegistry},
};

/// Actions returned by the typing coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingAction {
    /// Send this payload as a `typing` broadcast on the room channel
    Broadcast {
        /// Room
        room_id: RoomId,
        /// Payload to send
        payload: TypingPayload,
    },
    /// Deliver the room's current typing list to its observer
    Emit {
        /// Room
        room_id: RoomId,
        /// Users typing, sorted by user id
        users: Vec<TypingUser>,
    },
}

#[derive(Debug, Clone)]
struct LocalTyping {
    user_id: UserId,
    user_name: String,
}

/// Local and remote typing state for every room.
#[derive(Debug, Clone)]
pub struct TypingCoordinator<I> {
    config: TypingConfig,
    timers: TimerRegistry<I>,
    local: HashMap<RoomId, LocalTyping>,
    remote: HashMap<RoomId, BTreeMap<UserId, TypingUser>>,
}

impl<I: Instant> TypingCoordinator<I> {
    /// Create a coordinator with no typing state.
    pub fn new(config: TypingConfig) -> Self {
        Self { config, timers: TimerRegistry::new(), local: HashMap::new(), remote: HashMap::new() }
    }

    /// Local user started (or kept) typing.
    ///
    /// Re-arms the debounce; nothing is broadcast until it elapses.
    pub fn local_start(&mut self, room_id: &str, user_id: &str, user_name: &str, now: I) {
        self.local.insert(
            room_id.to_string(),
            LocalTyping { user_id: user_id.to_string(), user_name: user_name.to_string() },
        );
        self.timers.arm(
            TimerKey::user(room_id, user_id, TimerPurpose::TypingDebounce),
            now + self.config.debounce,
        );
    }

    /// Local user stopped typing. Broadcasts the stop immediately.
    pub fn local_stop(
        &mut self,
        room_id: &str,
        user_id: &str,
        user_name: &str,
        wall_clock: i64,
    ) -> Vec<TypingAction> {
        self.local.remove(room_id);
        self.timers.cancel(&TimerKey::user(room_id, user_id, TimerPurpose::TypingDebounce));
        self.timers.cancel(&TimerKey::user(room_id, user_id, TimerPurpose::TypingAutoStop));

        vec![broadcast(room_id, user_id, user_name, false, wall_clock)]
    }

    /// Apply a typing broadcast received from the room channel.
    ///
    /// Signals from `own_user_id` are ignored. A start emits only when it
    /// changes the visible list; a refresh just re-arms the cleanup.
    pub fn remote(
        &mut self,
        room_id: &str,
        payload: TypingPayload,
        own_user_id: Option<&str>,
        now: I,
    ) -> Vec<TypingAction> {
        if own_user_id == Some(payload.user_id.as_str()) {
            return Vec::new();
        }

        let key = TimerKey::user(room_id, payload.user_id.as_str(), TimerPurpose::TypingCleanup);
        if !payload.is_typing {
            self.timers.cancel(&key);
            let removed = self
                .remote
                .get_mut(room_id)
                .and_then(|users| users.remove(&payload.user_id))
                .is_some();
            return if removed { vec![self.emit(room_id)] } else { Vec::new() };
        }

        self.timers.arm(key, now + self.config.remote_expiry);

        let users = self.remote.entry(room_id.to_string()).or_default();
        let changed = users
            .get(&payload.user_id)
            .is_none_or(|existing| existing.user_name != payload.user_name);
        users.insert(
            payload.user_id.clone(),
            TypingUser {
                room_id: room_id.to_string(),
                user_id: payload.user_id,
                user_name: payload.user_name,
                timestamp: payload.timestamp,
            },
        );

        if changed { vec![self.emit(room_id)] } else { Vec::new() }
    }

    /// Fire every typing timer due at `now`.
    pub fn tick(&mut self, now: I, wall_clock: i64) -> Vec<TypingAction> {
        let mut actions = Vec::new();

        for key in self.timers.drain_expired(now) {
            let Some(user_id) = key.user_id else { continue };
            let room_id = key.room_id;

            match key.purpose {
                TimerPurpose::TypingDebounce => {
                    let Some(local) = self.local.get(&room_id) else { continue };
                    if local.user_id != user_id {
                        continue;
                    }
                    let user_name = local.user_name.clone();
                    debug!(room_id = %room_id, "broadcasting typing start");
                    self.timers.arm(
                        TimerKey::user(room_id.as_str(), user_id.as_str(), TimerPurpose::TypingAutoStop),
                        now + self.config.auto_stop,
                    );
                    actions.push(broadcast(&room_id, &user_id, &user_name, true, wall_clock));
                },
                TimerPurpose::TypingAutoStop => {
                    let Some(local) = self.local.remove(&room_id) else { continue };
                    debug!(room_id = %room_id, "typing auto-stop");
                    actions.push(broadcast(&room_id, &user_id, &local.user_name, false, wall_clock));
                },
                TimerPurpose::TypingCleanup => {
                    let removed = self
                        .remote
                        .get_mut(&room_id)
                        .and_then(|users| users.remove(&user_id))
                        .is_some();
                    if removed {
                        debug!(room_id = %room_id, user_id = %user_id, "remote typing expired");
                        actions.push(self.emit(&room_id));
                    }
                },
                TimerPurpose::HealthProbe => {},
            }
        }

        actions
    }

    /// Users currently typing in `room_id`, sorted by user id.
    pub fn typing_users(&self, room_id: &str) -> Vec<TypingUser> {
        self.remote.get(room_id).map(|users| users.values().cloned().collect()).unwrap_or_default()
    }

    /// Whether the local user has an unsent or unstopped typing start.
    pub fn is_local_typing(&self, room_id: &str) -> bool {
        self.local.contains_key(room_id)
    }

    /// Armed typing timers across all rooms.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Drop all typing state and timers for `room_id`.
    pub fn clear_room(&mut self, room_id: &str) {
        self.timers.cancel_room(room_id);
        self.local.remove(room_id);
        self.remote.remove(room_id);
    }

    fn emit(&mut self, room_id: &str) -> TypingAction {
        let users = self.typing_users(room_id);
        if users.is_empty() {
            self.remote.remove(room_id);
        }
        TypingAction::Emit { room_id: room_id.to_string(), users }
    }
}

fn broadcast(room_id: &str, user_id: &str, user_name: &str, is_typing: bool, timestamp: i64) -> TypingAction {
    TypingAction::Broadcast {
        room_id: room_id.to_string(),
        payload: TypingPayload {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            is_typing,
            timestamp,
        },
    }
}
