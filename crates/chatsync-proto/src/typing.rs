//! Typing broadcast payload.

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Broadcast event name carrying [`TypingPayload`].
pub const TYPING_EVENT: &str = "typing";

/// Payload of a `typing` broadcast. Field names are `camelCase` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    /// Typing user
    pub user_id: String,
    /// Typing user's display name
    pub user_name: String,
    /// Start (`true`) or stop (`false`)
    pub is_typing: bool,
    /// Sender wall clock (unix millis)
    pub timestamp: i64,
}

impl TypingPayload {
    /// Decode and validate a broadcast payload.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let payload: Self =
            serde_json::from_value(value).map_err(|e| ProtocolError::malformed("typing", &e))?;

        if payload.user_id.is_empty() {
            return Err(ProtocolError::EmptyField { kind: "typing", field: "userId" });
        }

        Ok(payload)
    }

    /// Encode for broadcast.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "userId": self.user_id,
            "userName": self.user_name,
            "isTyping": self.is_typing,
            "timestamp": self.timestamp,
        })
    }
}
