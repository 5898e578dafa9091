//! Message rows.
//!
//! [`MessageRow`] is the persisted shape of a chat message, as returned by the
//! backend and as carried in change-feed insert/update events. Field names are
//! `snake_case` on the wire; timestamps are unix milliseconds.

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Prefix reserved for client-generated ids of unconfirmed messages.
///
/// Server ids never start with it; rows that do are rejected.
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Kind of message content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text
    #[default]
    Text,
    /// Media attachment reference
    Media,
    /// System notice (joins, renames, ...)
    System,
}

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Stored by the backend
    #[default]
    Sent,
    /// Shown locally, awaiting confirmation
    Optimistic,
    /// Send failed
    Failed,
}

/// A reaction attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReactionRow {
    /// Reaction emoji
    pub emoji: String,
    /// User who reacted
    pub user_id: String,
}

/// A stored message row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    /// Server-assigned id
    pub id: String,
    /// Room the message belongs to
    pub room_id: String,
    /// Sender user id
    pub sender_id: String,
    /// Sender display name at send time
    pub sender_name: String,
    /// Message body
    pub content: String,
    /// Content kind
    #[serde(default)]
    pub message_type: MessageKind,
    /// Creation time (unix millis)
    pub created_at: i64,
    /// Read flag
    #[serde(default)]
    pub is_read: bool,
    /// Delivery status
    #[serde(default)]
    pub status: DeliveryStatus,
    /// Message this one replies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Reactions
    #[serde(default)]
    pub reactions: Vec<ReactionRow>,
    /// Soft-delete time (unix millis). Soft-deleted rows are never paged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

impl MessageRow {
    /// Decode and validate a row from a change-feed record.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let row: Self =
            serde_json::from_value(value).map_err(|e| ProtocolError::malformed("message", &e))?;
        row.validate()?;
        Ok(row)
    }

    /// Check the invariants a server row must satisfy.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::EmptyField` if `id`, `room_id` or `sender_id` is empty
    /// - `ProtocolError::TemporaryId` if `id` uses [`TEMP_ID_PREFIX`]
    pub fn validate(&self) -> Result<()> {
        for (field, value) in
            [("id", &self.id), ("room_id", &self.room_id), ("sender_id", &self.sender_id)]
        {
            if value.is_empty() {
                return Err(ProtocolError::EmptyField { kind: "message", field });
            }
        }

        if self.id.starts_with(TEMP_ID_PREFIX) {
            return Err(ProtocolError::TemporaryId(self.id.clone()));
        }

        Ok(())
    }

    /// Whether the row has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Fields sent to the backend to insert a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessageRow {
    /// Target room
    pub room_id: String,
    /// Sender user id
    pub sender_id: String,
    /// Sender display name
    pub sender_name: String,
    /// Message body
    pub content: String,
    /// Content kind
    pub message_type: MessageKind,
    /// Message this one replies to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Client timestamp (unix millis)
    pub created_at: i64,
    /// Read flag
    pub is_read: bool,
    /// Requested delivery status
    pub status: DeliveryStatus,
}

/// Paginated history request.
///
/// Backends return rows of `room_id` that are not soft-deleted, with
/// `created_at < before` when a cursor is given, newest first, at most
/// `limit` rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    /// Room to page
    pub room_id: String,
    /// Exclusive upper bound on `created_at`
    pub before: Option<i64>,
    /// Maximum rows to return
    pub limit: usize,
}
