//! xorshift64* random number generator
//!
//! Same seed → same sequence. The raw 64-bit state is exposed so checkpoints
//! can resume the stream exactly where it stopped.

use serde::{Deserialize, Serialize};

/// Seeded xorshift64* generator owned by a single simulation run
///
/// # Example
/// ```
/// use workflow_simulator_core_rs::SeededRng;
///
/// let mut rng = SeededRng::new(7);
/// let v = rng.uniform_int(1, 10);
/// assert!((1..=10).contains(&v));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    /// Create a generator from a seed (zero is remapped, xorshift cannot leave 0)
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Resume from a state captured with [`SeededRng::state`]
    pub fn from_state(state: u64) -> Self {
        Self::new(state)
    }

    /// Current internal state (for checkpointing)
    pub fn state(&self) -> u64 {
        self.state
    }

    /// Next raw 64-bit value
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Uniform f64 in [0.0, 1.0)
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / ((1u64 << 53) as f64))
    }

    /// Uniform integer in the closed range [min, max]
    ///
    /// # Panics
    /// Panics if `min > max`. Scenario validation rejects such ranges before
    /// a run can start.
    pub fn uniform_int(&mut self, min: i64, max: i64) -> i64 {
        assert!(min <= max, "min must not exceed max");
        let span = (max as i128 - min as i128 + 1) as u128;
        let offset = (self.next_u64() as u128) % span;
        (min as i128 + offset as i128) as i64
    }

    /// Uniform f64 in [min, max]
    pub fn uniform_f64(&mut self, min: f64, max: f64) -> f64 {
        if min == max {
            return min;
        }
        min + self.next_f64() * (max - min)
    }
}
