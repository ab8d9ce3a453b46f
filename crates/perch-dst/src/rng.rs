//! Deterministic RNG for simulation
//!
//! TigerStyle: ChaCha20-based RNG for reproducibility.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Deterministic random number generator
///
/// Given the same seed, produces the same sequence of values.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    seed: u64,
    rng: Arc<Mutex<ChaCha20Rng>>,
    fork_counter: Arc<AtomicU64>,
}

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            fork_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Seed from `DST_SEED`, or a random one
    ///
    /// Always logs the seed for reproducibility.
    pub fn from_env_or_random() -> Self {
        let seed = std::env::var("DST_SEED")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(rand::random);

        tracing::info!(seed = seed, "DST seed (set DST_SEED={} to replay)", seed);

        Self::new(seed)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn next_u64(&self) -> u64 {
        self.lock().gen()
    }

    /// Random f64 in [0, 1)
    pub fn next_f64(&self) -> f64 {
        self.lock().gen()
    }

    /// True with the given probability
    pub fn next_bool(&self, probability: f64) -> bool {
        debug_assert!(
            (0.0..=1.0).contains(&probability),
            "probability must be in [0, 1]"
        );
        self.next_f64() < probability
    }

    /// Random value in [min, max)
    pub fn next_range(&self, min: u64, max: u64) -> u64 {
        debug_assert!(min < max, "min must be less than max");
        min + (self.next_u64() % (max - min))
    }

    /// Independent stream seeded deterministically from this one
    pub fn fork(&self) -> Self {
        let fork_id = self.fork_counter.fetch_add(1, Ordering::SeqCst);
        let fork_seed = self
            .seed
            .wrapping_add(fork_id)
            .wrapping_mul(0x9E3779B97F4A7C15);
        Self::new(fork_seed)
    }

    fn lock(&self) -> MutexGuard<'_, ChaCha20Rng> {
        self.rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}
