//! Standard invariant checks.

use std::collections::{HashMap, HashSet};

use chatsync_core::RoomEventKind;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};
use crate::recorder::fold_events;

/// No message id appears twice, in the cache or in the observer's view.
///
/// A duplicate means a confirmation or an echo was delivered as a new
/// message instead of being reconciled.
pub struct UniqueMessageIds;

impl Invariant for UniqueMessageIds {
    fn name(&self) -> &'static str {
        "unique_message_ids"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for room in &state.rooms {
            let view = fold_events(&room.events);
            for (label, messages) in [("cache", &room.cache), ("view", &view)] {
                let mut seen = HashSet::new();
                if let Some(dup) = messages.iter().find(|m| !seen.insert(m.id.as_str())) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("room {}: {label} holds {} twice", room.room_id, dup.id),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Every optimistic message announced with `New` is resolved at most once,
/// by either `Replace` or `Delete`, and nothing resolves an id that was never
/// announced.
pub struct OptimisticResolvedOnce;

impl Invariant for OptimisticResolvedOnce {
    fn name(&self) -> &'static str {
        "optimistic_resolved_once"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for room in &state.rooms {
            let mut resolutions: HashMap<&str, usize> = HashMap::new();
            for event in &room.events {
                match &event.kind {
                    RoomEventKind::New => {
                        for item in event.items.iter().filter(|m| m.is_temporary()) {
                            resolutions.entry(item.id.as_str()).or_insert(0);
                        }
                    },
                    RoomEventKind::Replace { temp_id } => {
                        let Some(count) = resolutions.get_mut(temp_id.as_str()) else {
                            return Err(Violation {
                                invariant: self.name(),
                                message: format!("room {}: replace of unannounced {temp_id}", room.room_id),
                            });
                        };
                        *count += 1;
                    },
                    RoomEventKind::Delete => {
                        for item in event.items.iter().filter(|m| m.is_temporary()) {
                            if let Some(count) = resolutions.get_mut(item.id.as_str()) {
                                *count += 1;
                            }
                        }
                    },
                    RoomEventKind::Initial | RoomEventKind::Update => {},
                }
            }

            if let Some((id, count)) = resolutions.iter().find(|(_, count)| **count > 1) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("room {}: {id} resolved {count} times", room.room_id),
                });
            }
        }
        Ok(())
    }
}

/// The cache is ordered by timestamp.
pub struct CacheOrdered;

impl Invariant for CacheOrdered {
    fn name(&self) -> &'static str {
        "cache_ordered"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for room in &state.rooms {
            if let Some(pair) = room.cache.windows(2).find(|w| w[1].timestamp < w[0].timestamp) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "room {}: {} ({}) before {} ({})",
                        room.room_id, pair[0].id, pair[0].timestamp, pair[1].id, pair[1].timestamp
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Everything the observer currently displays is in the cache.
///
/// The cache may hold more: older pages are returned to the caller rather
/// than delivered as events.
pub struct ViewWithinCache;

impl Invariant for ViewWithinCache {
    fn name(&self) -> &'static str {
        "view_within_cache"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for room in &state.rooms {
            let cached: HashSet<&str> = room.cache.iter().map(|m| m.id.as_str()).collect();
            if let Some(missing) = fold_events(&room.events).iter().find(|m| !cached.contains(m.id.as_str())) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("room {}: observer shows {} but cache does not", room.room_id, missing.id),
                });
            }
        }
        Ok(())
    }
}
