//! Transport events.
//!
//! A subscribed channel yields [`RawChannelEvent`]s exactly as the transport
//! produced them. [`InboundEvent::parse`] is the only way into the engine:
//! each raw event becomes one tagged variant or a [`ProtocolError`].

use crate::{
    errors::Result,
    presence::PresenceMeta,
    row::MessageRow,
    typing::{TYPING_EVENT, TypingPayload},
};

/// Event as delivered by a transport channel, payloads still untyped.
#[derive(Debug, Clone, PartialEq)]
pub enum RawChannelEvent {
    /// Change feed: a message row was inserted
    Insert(serde_json::Value),
    /// Change feed: a message row was updated
    Update(serde_json::Value),
    /// Full presence snapshot
    PresenceSync(serde_json::Value),
    /// Broadcast message
    Broadcast {
        /// Broadcast event name
        event: String,
        /// Broadcast payload
        payload: serde_json::Value,
    },
    /// The transport closed the channel
    Closed {
        /// Close reason
        reason: String,
    },
}

/// Validated inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// New message row
    MessageInserted(MessageRow),
    /// Edited or status-changed message row
    MessageUpdated(MessageRow),
    /// Presence snapshot, flattened
    PresenceSynced(Vec<PresenceMeta>),
    /// Typing signal from another participant
    Typing(TypingPayload),
    /// Channel closed by the transport
    ChannelClosed {
        /// Close reason
        reason: String,
    },
    /// Broadcast this engine does not bind
    Ignored {
        /// Broadcast event name
        event: String,
    },
}

impl InboundEvent {
    /// Validate a raw channel event.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ProtocolError`] if the payload does not match the shape
    /// its event kind requires.
    pub fn parse(raw: RawChannelEvent) -> Result<Self> {
        match raw {
            RawChannelEvent::Insert(record) => {
                MessageRow::from_value(record).map(Self::MessageInserted)
            },
            RawChannelEvent::Update(record) => {
                MessageRow::from_value(record).map(Self::MessageUpdated)
            },
            RawChannelEvent::PresenceSync(state) => {
                PresenceMeta::snapshot_from_value(state).map(Self::PresenceSynced)
            },
            RawChannelEvent::Broadcast { event, payload } if event == TYPING_EVENT => {
                TypingPayload::from_value(payload).map(Self::Typing)
            },
            RawChannelEvent::Broadcast { event, .. } => Ok(Self::Ignored { event }),
            RawChannelEvent::Closed { reason } => Ok(Self::ChannelClosed { reason }),
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageInserted(_) => "insert",
            Self::MessageUpdated(_) => "update",
            Self::PresenceSynced(_) => "presence",
            Self::Typing(_) => "typing",
            Self::ChannelClosed { .. } => "closed",
            Self::Ignored { .. } => "ignored",
        }
    }
}
