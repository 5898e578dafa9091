//! Simulated environment.
//!
//! Time comes from tokio's clock, which is virtual under a paused runtime or
//! inside a turmoil host, so heartbeats, backoff ladders and typing expiry run
//! instantly. Randomness comes from a seeded `ChaCha20`, so temporary ids and
//! any other random choice replay identically for the same seed.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chatsync_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tokio::time::Instant;

/// Wall clock origin: 2024-01-01T00:00:00Z.
pub const SIM_EPOCH_MILLIS: i64 = 1_704_067_200_000;

/// Deterministic [`Environment`] for simulation.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    origin: Instant,
}

impl SimEnv {
    /// Create an environment with the given RNG seed.
    ///
    /// Must be called inside a tokio runtime; the wall clock starts at
    /// [`SIM_EPOCH_MILLIS`] and advances with virtual time.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))), origin: Instant::now() }
    }
}

impl Environment for SimEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        // A poisoned RNG still holds a valid state.
        let mut rng = self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        rng.fill_bytes(buffer);
    }

    fn wall_clock_millis(&self) -> i64 {
        let elapsed = Instant::now() - self.origin;
        SIM_EPOCH_MILLIS + elapsed.as_millis() as i64
    }
}
