//! Chat sync wire protocol
//!
//! Types exchanged with the pub/sub transport and the persistence backend.
//! Transport payloads arrive loosely typed ([`RawChannelEvent`]); they are
//! validated once, here, and turned into [`InboundEvent`] variants so the
//! engine never touches an untyped blob.
//!
//! # Components
//!
//! - [`row`]: message rows as stored by the backend and carried by the change
//!   feed
//! - [`presence`]: presence metadata tracked per channel
//! - [`typing`]: the `typing` broadcast payload
//! - [`event`]: raw transport events and their parsed form

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod event;
pub mod presence;
pub mod row;
pub mod typing;

pub use errors::{ProtocolError, Result};
pub use event::{InboundEvent, RawChannelEvent};
pub use presence::PresenceMeta;
pub use row::{
    DeliveryStatus, MessageKind, MessageRow, NewMessageRow, PageQuery, ReactionRow,
    TEMP_ID_PREFIX,
};
pub use typing::{TYPING_EVENT, TypingPayload};
