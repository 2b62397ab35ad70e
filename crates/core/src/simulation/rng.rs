//! Seeded random number generator for deterministic simulation.
//!
//! Every random decision the path simulator makes (drops, jitter) goes through
//! one [`SimulationRng`], so a run is fully reproducible from its seed.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::{rngs::SmallRng, Rng, SeedableRng};

/// A thread-safe, seeded random number generator.
///
/// Clones share the same generator state, so the order of calls across all
/// clones determines the sequence.
#[derive(Clone)]
pub struct SimulationRng {
    inner: Arc<Mutex<SmallRng>>,
    seed: u64,
}

impl SimulationRng {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SmallRng::seed_from_u64(seed))),
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// `true` with the given probability. Probabilities outside [0, 1] are
    /// clamped.
    pub fn gen_bool(&self, probability: f64) -> bool {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        self.inner.lock().random_bool(probability)
    }

    pub fn gen_u64(&self) -> u64 {
        self.inner.lock().random()
    }

    /// Uniform in [0, 1).
    pub fn gen_f64(&self) -> f64 {
        self.inner.lock().random()
    }

    pub fn gen_range_u64(&self, range: std::ops::Range<u64>) -> u64 {
        if range.is_empty() {
            return range.start;
        }
        self.inner.lock().random_range(range)
    }

    /// Derive an independent generator, e.g. one per simulated path.
    pub fn child_with_index(&self, index: u64) -> Self {
        let derived_seed = self
            .seed
            .wrapping_mul(0x517cc1b727220a95)
            .wrapping_add(index);
        Self::new(derived_seed)
    }
}

impl std::fmt::Debug for SimulationRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationRng")
            .field("seed", &self.seed)
            .finish()
    }
}
