//! Chat sync core
//!
//! Pure state machines behind the chat synchronization engine. Nothing here
//! performs I/O or reads a clock: time is passed in, and methods return
//! actions for the caller to execute. The async engine in `chatsync-client`
//! owns one instance of each and drives them.
//!
//! # Components
//!
//! - [`connection::ConnectionManager`]: connection status, heartbeat schedule,
//!   exponential reconnection backoff, status listeners
//! - [`dedup::Deduplicator`]: per-room fingerprint and id index
//! - [`ledger::OptimisticLedger`]: unconfirmed local sends awaiting
//!   reconciliation
//! - [`typing::TypingCoordinator`]: local debounce/auto-stop and remote expiry
//! - [`presence::PresenceTracker`]: member lists rebuilt from snapshots
//! - [`health::HealthMonitor`]: per-room idle detection and probing
//! - [`timers::TimerRegistry`]: typed deadlines keyed by room, user and purpose
//! - [`cache::MessageCache`]: per-room timestamp-ordered message list

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cache;
pub mod config;
pub mod connection;
pub mod dedup;
pub mod env;
pub mod error;
pub mod health;
pub mod ledger;
pub mod message;
pub mod presence;
pub mod timers;
pub mod typing;

pub use config::SyncConfig;
pub use connection::{ConnectionAction, ConnectionManager, ConnectionSnapshot, ConnectionStatus};
pub use env::Environment;
pub use error::SyncError;
pub use message::{
    ChatMember, ChatMessage, MessageId, MessagePage, Reaction, RoomEvent, RoomEventKind, RoomId,
    TypingUser, UserId,
};
