//! Presence tracker.
//!
//! Every presence sync carries the channel's full snapshot, so the member list
//! is rebuilt from scratch each time instead of being patched. A user connected
//! from several devices appears once, with the latest `online_at` as
//! `last_seen`.

use std::collections::{BTreeMap, HashMap};

use chatsync_proto::PresenceMeta;

use crate::message::{ChatMember, RoomId};

/// Member lists for every joined room.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    members: HashMap<RoomId, Vec<ChatMember>>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `room_id`'s member list with the one in `snapshot`.
    ///
    /// Returns the new list, sorted by user id.
    pub fn sync(&mut self, room_id: &str, snapshot: Vec<PresenceMeta>) -> Vec<ChatMember> {
        let mut by_user: BTreeMap<String, ChatMember> = BTreeMap::new();

        for meta in snapshot {
            by_user
                .entry(meta.user_id.clone())
                .and_modify(|member| {
                    if meta.online_at >= member.last_seen {
                        member.last_seen = meta.online_at;
                        member.user_name.clone_from(&meta.user_name);
                    }
                })
                .or_insert_with(|| ChatMember {
                    room_id: room_id.to_string(),
                    user_id: meta.user_id.clone(),
                    user_name: meta.user_name.clone(),
                    online: true,
                    last_seen: meta.online_at,
                });
        }

        let members: Vec<ChatMember> = by_user.into_values().collect();
        self.members.insert(room_id.to_string(), members.clone());
        members
    }

    /// Current members of `room_id`.
    pub fn members(&self, room_id: &str) -> &[ChatMember] {
        self.members.get(room_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Forget `room_id`.
    pub fn clear_room(&mut self, room_id: &str) {
        self.members.remove(room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(user: &str, name: &str, online_at: i64) -> PresenceMeta {
        PresenceMeta { user_id: user.into(), user_name: name.into(), online_at }
    }

    #[test]
    fn rebuilds_wholesale() {
        let mut presence = PresenceTracker::new();
        presence.sync("r1", vec![meta("u1", "Ada", 1), meta("u2", "Bo", 2)]);

        let members = presence.sync("r1", vec![meta("u2", "Bo", 2)]);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, "u2");
        assert!(members[0].online);
        assert_eq!(presence.members("r1"), members.as_slice());
    }

    #[test]
    fn merges_devices_of_one_user() {
        let mut presence = PresenceTracker::new();
        let members =
            presence.sync("r1", vec![meta("u1", "Ada", 5), meta("u1", "Ada L.", 9), meta("u1", "A", 3)]);

        assert_eq!(members.len(), 1);
        assert_eq!(members[0].last_seen, 9);
        assert_eq!(members[0].user_name, "Ada L.");
    }

    #[test]
    fn rooms_are_independent() {
        let mut presence = PresenceTracker::new();
        presence.sync("r1", vec![meta("u1", "Ada", 1)]);
        presence.sync("r2", vec![]);
        presence.clear_room("r2");

        assert_eq!(presence.members("r1").len(), 1);
        assert!(presence.members("r2").is_empty());
    }
}
