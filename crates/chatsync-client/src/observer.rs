//! Per-room callbacks.
//!
//! A [`RoomObserver`] is supplied at join time and kept for the life of the
//! room, across pauses and reconnections. Callbacks run synchronously while
//! the engine holds its state lock: they must not block, and must not call
//! back into the engine. Hosts that need to do async work can use
//! [`ChannelObserver`] and consume the updates from a task.

use std::sync::Arc;

use chatsync_core::{ChatMember, RoomEvent, SyncError, TypingUser};
use tokio::sync::mpsc;

/// UI-facing callbacks for one room.
pub trait RoomObserver: Send + Sync + 'static {
    /// Message event: initial history, new, update, replace or delete.
    fn on_message(&self, event: &RoomEvent);

    /// Full member list after a presence sync.
    fn on_presence(&self, _members: &[ChatMember]) {}

    /// Current typing users after a change.
    fn on_typing(&self, _users: &[TypingUser]) {}

    /// Failure that could not be recovered automatically.
    fn on_error(&self, _error: &SyncError) {}
}

/// One observer callback, as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomUpdate {
    /// [`RoomObserver::on_message`]
    Message(RoomEvent),
    /// [`RoomObserver::on_presence`]
    Presence(Vec<ChatMember>),
    /// [`RoomObserver::on_typing`]
    Typing(Vec<TypingUser>),
    /// [`RoomObserver::on_error`]
    Error(SyncError),
}

/// Observer forwarding every callback into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<RoomUpdate>,
}

impl ChannelObserver {
    /// Create an observer and the receiver for its updates.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<RoomUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn forward(&self, update: RoomUpdate) {
        // Receiver gone means the host stopped listening; nothing to do.
        let _ = self.tx.send(update);
    }
}

impl RoomObserver for ChannelObserver {
    fn on_message(&self, event: &RoomEvent) {
        self.forward(RoomUpdate::Message(event.clone()));
    }

    fn on_presence(&self, members: &[ChatMember]) {
        self.forward(RoomUpdate::Presence(members.to_vec()));
    }

    fn on_typing(&self, users: &[TypingUser]) {
        self.forward(RoomUpdate::Typing(users.to_vec()));
    }

    fn on_error(&self, error: &SyncError) {
        self.forward(RoomUpdate::Error(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use chatsync_core::RoomEvent;

    use super::*;

    #[test]
    fn forwards_in_call_order() {
        let (observer, mut rx) = ChannelObserver::new();
        observer.on_message(&RoomEvent::initial(Vec::new()));
        observer.on_typing(&[]);
        observer.on_error(&SyncError::Network("down".into()));

        assert!(matches!(rx.try_recv(), Ok(RoomUpdate::Message(_))));
        assert!(matches!(rx.try_recv(), Ok(RoomUpdate::Typing(_))));
        assert!(matches!(rx.try_recv(), Ok(RoomUpdate::Error(SyncError::Network(_)))));
    }

    #[test]
    fn dropped_receiver_is_harmless() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_presence(&[]);
    }
}
