//! Injectable randomness.
//!
//! Every draw in a run goes through a [`RandomSource`]. The default is a
//! seeded ChaCha8 generator so runs are reproducible.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// A source of uniform samples, with normal samples derived from it.
pub trait RandomSource {
    /// Uniform sample in `[0, 1)`.
    fn uniform(&mut self) -> f64;

    /// Standard normal sample using the Box-Muller transform.
    fn standard_normal(&mut self) -> f64 {
        let mut u = 0.0;
        while u == 0.0 {
            u = self.uniform();
        }
        let mut v = 0.0;
        while v == 0.0 {
            v = self.uniform();
        }
        (-2.0 * u.ln()).sqrt() * (2.0 * std::f64::consts::PI * v).cos()
    }

    /// Normal sample with the given mean and standard deviation, floored.
    fn normal(&mut self, mean: f64, std: f64) -> i64 {
        (self.standard_normal() * std + mean).floor() as i64
    }
}

/// Deterministic generator seeded from a `u64`.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: ChaCha8Rng,
    seed: u64,
}

impl SeededRandom {
    /// Creates a generator from `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }

    /// The seed this generator started from.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Default for SeededRandom {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RandomSource for SeededRandom {
    fn uniform(&mut self) -> f64 {
        self.rng.random()
    }
}

/// Non-reproducible generator backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntropyRandom;

impl RandomSource for EntropyRandom {
    fn uniform(&mut self) -> f64 {
        rand::rng().random()
    }
}
