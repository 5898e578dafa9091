//! Engine data model.
//!
//! [`ChatMessage`] is the engine's view of a message: a [`MessageRow`] once
//! confirmed, or a locally built optimistic copy carrying a temporary id.
//! Everything handed to observers is a clone of these types.

use chatsync_proto::{MessageRow, NewMessageRow, ReactionRow, TEMP_ID_PREFIX};
pub use chatsync_proto::{DeliveryStatus, MessageKind};

/// Room identifier.
pub type RoomId = String;

/// User identifier.
pub type UserId = String;

/// Message identifier (server id or temporary id).
pub type MessageId = String;

/// Build a temporary id for an optimistic message.
///
/// Temporary ids carry [`TEMP_ID_PREFIX`], which server rows are not allowed to
/// use, so they cannot collide with confirmed ids.
pub fn temp_id(timestamp: i64, nonce: u64) -> MessageId {
    format!("{TEMP_ID_PREFIX}{timestamp}_{nonce:016x}")
}

/// A reaction on a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reaction {
    /// Reaction emoji
    pub emoji: String,
    /// Reacting user
    pub user_id: UserId,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Server id, or temporary id while optimistic
    pub id: MessageId,
    /// Owning room
    pub room_id: RoomId,
    /// Sender
    pub sender_id: UserId,
    /// Sender display name
    pub sender_name: String,
    /// Body
    pub content: String,
    /// Content kind
    pub kind: MessageKind,
    /// Unix millis; defines ordering within a room
    pub timestamp: i64,
    /// Read flag
    pub is_read: bool,
    /// Delivery status
    pub status: DeliveryStatus,
    /// Replied-to message
    pub reply_to: Option<MessageId>,
    /// Reactions
    pub reactions: Vec<Reaction>,
}

/// Fields of a message the local user is sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Target room
    pub room_id: RoomId,
    /// Sender
    pub sender_id: UserId,
    /// Sender display name
    pub sender_name: String,
    /// Body
    pub content: String,
    /// Content kind
    pub kind: MessageKind,
    /// Replied-to message
    pub reply_to: Option<MessageId>,
}

impl ChatMessage {
    /// Build the optimistic copy of an outgoing message.
    pub fn optimistic(id: MessageId, outgoing: OutgoingMessage, timestamp: i64) -> Self {
        Self {
            id,
            room_id: outgoing.room_id,
            sender_id: outgoing.sender_id,
            sender_name: outgoing.sender_name,
            content: outgoing.content,
            kind: outgoing.kind,
            timestamp,
            is_read: false,
            status: DeliveryStatus::Optimistic,
            reply_to: outgoing.reply_to,
            reactions: Vec::new(),
        }
    }

    /// Whether this message still carries a temporary id.
    pub fn is_temporary(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }

    /// Row to insert for this message.
    pub fn to_new_row(&self) -> NewMessageRow {
        NewMessageRow {
            room_id: self.room_id.clone(),
            sender_id: self.sender_id.clone(),
            sender_name: self.sender_name.clone(),
            content: self.content.clone(),
            message_type: self.kind,
            reply_to: self.reply_to.clone(),
            created_at: self.timestamp,
            is_read: false,
            status: DeliveryStatus::Sent,
        }
    }
}

impl From<MessageRow> for ChatMessage {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            room_id: row.room_id,
            sender_id: row.sender_id,
            sender_name: row.sender_name,
            content: row.content,
            kind: row.message_type,
            timestamp: row.created_at,
            is_read: row.is_read,
            status: row.status,
            reply_to: row.reply_to,
            reactions: row
                .reactions
                .into_iter()
                .map(|ReactionRow { emoji, user_id }| Reaction { emoji, user_id })
                .collect(),
        }
    }
}

/// A remote participant currently typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUser {
    /// Room
    pub room_id: RoomId,
    /// Typing user
    pub user_id: UserId,
    /// Display name
    pub user_name: String,
    /// Last signal (sender wall clock, unix millis)
    pub timestamp: i64,
}

/// A room member derived from presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMember {
    /// Room
    pub room_id: RoomId,
    /// Member
    pub user_id: UserId,
    /// Display name
    pub user_name: String,
    /// Present in the latest snapshot
    pub online: bool,
    /// Latest `online_at` seen (unix millis)
    pub last_seen: i64,
}

/// What a [`RoomEvent`] reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEventKind {
    /// Initial history page, oldest first
    Initial,
    /// New message (optimistic or remote)
    New,
    /// Existing message changed
    Update,
    /// Optimistic message confirmed under its final id
    Replace {
        /// Temporary id being superseded
        temp_id: MessageId,
    },
    /// Message removed (failed send or soft delete)
    Delete,
}

/// Message event delivered to a room observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomEvent {
    /// Event kind
    pub kind: RoomEventKind,
    /// Affected messages, ordered
    pub items: Vec<ChatMessage>,
}

impl RoomEvent {
    /// Initial history.
    pub fn initial(items: Vec<ChatMessage>) -> Self {
        Self { kind: RoomEventKind::Initial, items }
    }

    /// A single new message.
    pub fn new_message(message: ChatMessage) -> Self {
        Self { kind: RoomEventKind::New, items: vec![message] }
    }

    /// A single updated message.
    pub fn update(message: ChatMessage) -> Self {
        Self { kind: RoomEventKind::Update, items: vec![message] }
    }

    /// Confirmation of an optimistic message.
    pub fn replace(temp_id: MessageId, message: ChatMessage) -> Self {
        Self { kind: RoomEventKind::Replace { temp_id }, items: vec![message] }
    }

    /// Removal of a message.
    pub fn delete(message: ChatMessage) -> Self {
        Self { kind: RoomEventKind::Delete, items: vec![message] }
    }
}

/// Page of older messages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessagePage {
    /// Messages, oldest first
    pub messages: Vec<ChatMessage>,
    /// Whether older messages remain
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outgoing() -> OutgoingMessage {
        OutgoingMessage {
            room_id: "r1".into(),
            sender_id: "u1".into(),
            sender_name: "Ada".into(),
            content: "hi".into(),
            kind: MessageKind::Text,
            reply_to: Some("m0".into()),
        }
    }

    #[test]
    fn temp_ids_are_recognized() {
        let id = temp_id(1_700_000_000_000, 0xabcd);
        assert!(id.starts_with("temp_1700000000000_"));

        let msg = ChatMessage::optimistic(id, outgoing(), 1);
        assert!(msg.is_temporary());
        assert_eq!(msg.status, DeliveryStatus::Optimistic);
    }

    #[test]
    fn new_row_requests_sent_status() {
        let msg = ChatMessage::optimistic(temp_id(5, 1), outgoing(), 5);
        let row = msg.to_new_row();
        assert_eq!(row.status, DeliveryStatus::Sent);
        assert_eq!(row.created_at, 5);
        assert_eq!(row.reply_to.as_deref(), Some("m0"));
    }

    #[test]
    fn converts_rows() {
        let row = MessageRow {
            id: "m1".into(),
            room_id: "r1".into(),
            sender_id: "u1".into(),
            sender_name: "Ada".into(),
            content: "hi".into(),
            message_type: MessageKind::Media,
            created_at: 9,
            is_read: true,
            status: DeliveryStatus::Sent,
            reply_to: None,
            reactions: vec![ReactionRow { emoji: "+1".into(), user_id: "u2".into() }],
            deleted_at: None,
        };

        let msg = ChatMessage::from(row);
        assert!(!msg.is_temporary());
        assert_eq!(msg.kind, MessageKind::Media);
        assert_eq!(msg.reactions, vec![Reaction { emoji: "+1".into(), user_id: "u2".into() }]);
    }
}
