//! Collaborator errors.
//!
//! Each injected collaborator reports failures in its own vocabulary; the
//! engine folds them into [`SyncError`] at its surface.

use std::time::Duration;

use chatsync_core::SyncError;
use chatsync_proto::ProtocolError;
use thiserror::Error;

use crate::transport::ChannelId;

/// Pub/sub transport failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Transport could not be reached.
    #[error("transport unreachable: {0}")]
    Unreachable(String),

    /// Channel subscription was refused.
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// Subscription neither confirmed nor failed in time.
    #[error("subscribe timed out after {0:?}")]
    Timeout(Duration),

    /// Channel handle no longer known to the transport.
    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),

    /// Presence or broadcast write failed.
    #[error("send failed: {0}")]
    Send(String),
}

impl TransportError {
    /// Returns true if retrying may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::UnknownChannel(_))
    }
}

/// Persistence backend failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Backend could not be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Backend refused the request.
    #[error("backend rejected request: {0}")]
    Rejected(String),

    /// Backend returned a row that failed validation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl BackendError {
    /// Returns true if retrying may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Identity provider failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No signed-in user.
    #[error("no identity available")]
    NoIdentity,

    /// Provider failed to answer.
    #[error("identity provider failed: {0}")]
    Provider(String),
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<BackendError> for SyncError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Protocol(e) => e.into(),
            other => Self::Network(other.to_string()),
        }
    }
}

impl From<AuthError> for SyncError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err.to_string())
    }
}
