//! Protocol errors.
//!
//! Every failure to turn a transport payload into a typed event ends up here.
//! These are never transient: a malformed payload stays malformed on retry.

use thiserror::Error;

/// Result alias for protocol parsing.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while validating inbound payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload could not be decoded into the expected shape.
    #[error("malformed {kind} payload: {reason}")]
    Malformed {
        /// Which payload was being decoded
        kind: &'static str,
        /// Decoder error
        reason: String,
    },

    /// A required field was present but empty.
    #[error("empty `{field}` in {kind} payload")]
    EmptyField {
        /// Which payload was being decoded
        kind: &'static str,
        /// Offending field
        field: &'static str,
    },

    /// A server row carried a client-side temporary id.
    #[error("server row uses reserved temporary id {0}")]
    TemporaryId(String),
}

impl ProtocolError {
    pub(crate) fn malformed(kind: &'static str, err: &serde_json::Error) -> Self {
        Self::Malformed { kind, reason: err.to_string() }
    }
}
