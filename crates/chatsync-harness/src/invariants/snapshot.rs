//! Observable state captured for invariant checks.

use chatsync_client::ChatEngine;
use chatsync_core::{ChatMessage, Environment, RoomEvent, RoomId};

use crate::recorder::RecordingObserver;

/// One room as seen by its observer and by the engine.
#[derive(Debug, Clone, Default)]
pub struct RoomSnapshot {
    /// Room
    pub room_id: RoomId,
    /// Message events delivered to the observer, in order
    pub events: Vec<RoomEvent>,
    /// Engine cache, in cache order
    pub cache: Vec<ChatMessage>,
}

/// Every room of interest at one point in a run.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Rooms
    pub rooms: Vec<RoomSnapshot>,
}

impl SystemSnapshot {
    /// Capture the given rooms from `engine` and their recorders.
    pub async fn capture<E: Environment>(
        engine: &ChatEngine<E>,
        rooms: &[(&str, &RecordingObserver)],
    ) -> Self {
        let mut captured = Vec::with_capacity(rooms.len());
        for (room_id, recorder) in rooms {
            captured.push(RoomSnapshot {
                room_id: (*room_id).to_string(),
                events: recorder.message_events(),
                cache: engine.cached_messages(room_id).await,
            });
        }
        Self { rooms: captured }
    }
}
