//! Engine error taxonomy.
//!
//! Callers of the engine see three kinds of failure: the identity is missing
//! or invalid ([`SyncError::Auth`]), the transport or backend could not be
//! reached in time ([`SyncError::Network`]), or a payload made no sense
//! ([`SyncError::Unknown`]). The remaining variants report API misuse.

use chatsync_proto::ProtocolError;
use thiserror::Error;

use crate::message::RoomId;

/// Errors surfaced by the chat sync engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// No identity, or the identity was rejected
    #[error("authentication error: {0}")]
    Auth(String),

    /// Transport unreachable, subscribe failure or timeout, send failure
    #[error("network error: {0}")]
    Network(String),

    /// Malformed inbound payload or unexpected collaborator response
    #[error("unknown error: {0}")]
    Unknown(String),

    /// Operation requires a joined room
    #[error("room {0} is not joined")]
    RoomNotJoined(RoomId),

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Returns true if retrying the operation may succeed.
    ///
    /// Only network failures are transient. Authentication needs a new
    /// identity and malformed payloads stay malformed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        Self::Unknown(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_transient() {
        assert!(SyncError::Network("timeout".into()).is_transient());
        assert!(!SyncError::Auth("no identity".into()).is_transient());
        assert!(!SyncError::Unknown("bad row".into()).is_transient());
        assert!(!SyncError::RoomNotJoined("r".into()).is_transient());
    }

    #[test]
    fn protocol_errors_map_to_unknown() {
        let err: SyncError = ProtocolError::TemporaryId("temp_1".into()).into();
        assert!(matches!(err, SyncError::Unknown(_)));
    }
}
