//! Pub/sub transport seam.
//!
//! A [`Transport`] hands out one channel per room subscription. Each channel
//! delivers [`RawChannelEvent`]s for the bindings requested at subscribe time;
//! the engine parses them at the boundary.

use std::fmt;

use async_trait::async_trait;
use chatsync_proto::{PresenceMeta, RawChannelEvent};
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Transport-assigned channel handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Event kind a channel should deliver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Binding {
    /// Change feed inserts on the room's messages
    MessageInsert,
    /// Change feed updates on the room's messages
    MessageUpdate,
    /// Presence snapshots
    PresenceSync,
    /// Broadcasts with this event name
    Broadcast(String),
}

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Transport topic
    pub topic: String,
    /// Room the channel serves; change-feed events are filtered to it
    pub room_id: String,
    /// Presence key for this subscriber
    pub presence_key: String,
    /// Requested bindings
    pub bindings: Vec<Binding>,
}

impl ChannelSpec {
    /// Channel spec for a chat room: message insert/update, presence and the
    /// given broadcast events.
    pub fn room(room_id: &str, presence_key: &str, broadcasts: &[&str]) -> Self {
        let mut bindings = vec![Binding::MessageInsert, Binding::MessageUpdate, Binding::PresenceSync];
        bindings.extend(broadcasts.iter().map(|event| Binding::Broadcast((*event).to_string())));
        Self {
            topic: format!("room:{room_id}"),
            room_id: room_id.to_string(),
            presence_key: presence_key.to_string(),
            bindings,
        }
    }
}

/// A confirmed subscription.
#[derive(Debug)]
pub struct Subscribed {
    /// Handle for later calls
    pub channel: ChannelId,
    /// Inbound events. Closing the receiver abandons the channel.
    pub events: mpsc::UnboundedReceiver<RawChannelEvent>,
}

/// Pub/sub transport.
///
/// Implementations must be cheap to call concurrently; the engine never
/// holds its state lock across these calls.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the connection.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Drop the connection and every channel on it.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Liveness check used by the heartbeat.
    async fn is_connected(&self) -> bool;

    /// Open a channel. Resolves once the transport confirms or refuses.
    async fn subscribe(&self, spec: ChannelSpec) -> Result<Subscribed, TransportError>;

    /// Close a channel.
    async fn unsubscribe(&self, channel: ChannelId) -> Result<(), TransportError>;

    /// Publish this subscriber's presence on a channel.
    async fn track(&self, channel: ChannelId, meta: PresenceMeta) -> Result<(), TransportError>;

    /// Withdraw this subscriber's presence from a channel.
    async fn untrack(&self, channel: ChannelId) -> Result<(), TransportError>;

    /// Send a broadcast to the channel's other subscribers.
    async fn broadcast(
        &self,
        channel: ChannelId,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_spec_binds_change_feed_presence_and_broadcasts() {
        let spec = ChannelSpec::room("r1", "u1", &["typing"]);
        assert_eq!(spec.topic, "room:r1");
        assert_eq!(spec.bindings.len(), 4);
        assert!(spec.bindings.contains(&Binding::Broadcast("typing".into())));
    }
}
