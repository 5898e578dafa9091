//! Persistence backend seam.

use async_trait::async_trait;
use chatsync_proto::{MessageRow, NewMessageRow, PageQuery};

use crate::error::BackendError;

/// Message storage.
#[async_trait]
pub trait MessageBackend: Send + Sync + 'static {
    /// Insert a message and return the stored row with its server id.
    async fn insert_message(&self, row: NewMessageRow) -> Result<MessageRow, BackendError>;

    /// Page of a room's history, newest first, soft-deleted rows excluded.
    ///
    /// Only rows strictly older than `query.before` are returned when a
    /// cursor is given.
    async fn fetch_messages(&self, query: PageQuery) -> Result<Vec<MessageRow>, BackendError>;
}
