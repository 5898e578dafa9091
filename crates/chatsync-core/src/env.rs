//! Environment abstraction for deterministic testing.
//!
//! Decouples engine logic from system resources (time, randomness). The
//! production environment uses the OS clock and RNG; the simulation harness
//! uses tokio's virtual clock and a seeded RNG, so 30-second heartbeats and
//! backoff ladders run instantly and reproducibly.

use std::{
    fmt::Debug,
    ops::{Add, Sub},
    time::Duration,
};

/// Monotonic instant usable as a deadline.
///
/// Blanket-implemented for any type with the required arithmetic, which
/// covers both `std::time::Instant` and `tokio::time::Instant`.
pub trait Instant:
    Copy + Ord + Debug + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = Self> + 'static
{
}

impl<T> Instant for T where
    T: Copy
        + Ord
        + Debug
        + Send
        + Sync
        + Sub<Output = Duration>
        + Add<Duration, Output = T>
        + 'static
{
}

/// Abstract environment providing time, randomness, and async sleeping.
///
/// # Invariants
///
/// - `now()` never goes backwards
/// - `wall_clock_millis()` is only used for message timestamps, never for
///   scheduling
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    type Instant: Instant;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code sleeps; the state machines in this crate never do.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Wall clock time as unix milliseconds.
    fn wall_clock_millis(&self) -> i64;

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
