//! Deterministic simulation harness for the chat sync engine.
//!
//! Provides a seeded [`SimEnv`], an in-memory [`MemoryHub`] standing in for
//! the hosted realtime service, a [`RecordingObserver`] and invariant checks
//! over what observers saw. Under a paused tokio runtime (or a turmoil host)
//! every heartbeat, backoff and typing timer runs on virtual time, so whole
//! reconnection ladders replay in milliseconds and identically per seed.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks behavioral properties of a run: no
//! duplicate ids, every optimistic send resolved at most once, ordered
//! caches. Use [`InvariantRegistry::standard()`] for all of them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod hub;
pub mod invariants;
pub mod recorder;
pub mod sim_env;
pub mod world;

pub use hub::{ClientId, HubClient, MemoryHub};
pub use invariants::{
    CacheOrdered, Invariant, InvariantRegistry, InvariantResult, OptimisticResolvedOnce,
    RoomSnapshot, SystemSnapshot, UniqueMessageIds, ViewWithinCache, Violation,
};
pub use recorder::{RecordingObserver, fold_events};
pub use sim_env::{SIM_EPOCH_MILLIS, SimEnv};
pub use world::SimClient;
