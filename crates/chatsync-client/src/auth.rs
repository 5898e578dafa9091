//! Identity provider seam.

use async_trait::async_trait;
use chatsync_core::UserId;

use crate::error::AuthError;

/// Signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// User id
    pub user_id: UserId,
    /// Display name
    pub display_name: String,
}

/// Source of the current identity.
#[async_trait]
pub trait AuthProvider: Send + Sync + 'static {
    /// Current identity. Checked at initialization and on every heartbeat.
    async fn current_identity(&self) -> Result<Identity, AuthError>;
}
