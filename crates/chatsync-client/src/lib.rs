//! Chat sync client
//!
//! The async [`ChatEngine`] that owns every joined room and drives the
//! state machines from `chatsync-core` against injected collaborators:
//!
//! - [`Transport`]: pub/sub channels with change-feed, presence and broadcast
//! - [`MessageBackend`]: message insert and paginated history
//! - [`AuthProvider`]: the current identity
//!
//! UI code receives per-room callbacks through [`RoomObserver`].
//!
//! # Concurrency
//!
//! All mutable engine state sits behind one async mutex. Every transition
//! (API call, inbound event, timer tick) runs while holding it, and observers
//! are invoked before it is released, so each room sees events in the order
//! the engine applied them. Network calls are made with the lock released.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod auth;
pub mod backend;
pub mod engine;
pub mod error;
pub mod observer;
pub mod system_env;
pub mod transport;

pub use auth::{AuthProvider, Identity};
pub use backend::MessageBackend;
pub use engine::{ChatEngine, ConnectionHealth, StatusSubscription};
pub use error::{AuthError, BackendError, TransportError};
pub use observer::{ChannelObserver, RoomObserver, RoomUpdate};
pub use system_env::SystemEnv;
pub use transport::{Binding, ChannelId, ChannelSpec, Subscribed, Transport};
