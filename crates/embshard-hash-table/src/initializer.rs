//! First values of shard rows.
//!
//! A [`ShardTable`](crate::ShardTable) materializes a row the first time its
//! local id is pooled. The initializer decides the row's starting value from
//! the local id alone, so every run of a step sees the same rows.
//!
//! # Example
//!
//! ```
//! use embshard_hash_table::initializer::{Initializer, SeededUniformInitializer};
//!
//! let init = SeededUniformInitializer::new(3, -0.05, 0.05);
//! assert_eq!(init.initialize(11, 16).len(), 16);
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Produces the starting row for a local id.
pub trait Initializer: Send + Sync {
    /// Returns a row of `dim` values for local id `id`.
    fn initialize(&self, id: i64, dim: usize) -> Vec<f32>;

    /// Returns a short name for logs.
    fn name(&self) -> &str;
}

/// Every row starts at zero.
///
/// ```
/// use embshard_hash_table::initializer::{Initializer, ZerosInitializer};
///
/// assert_eq!(ZerosInitializer.initialize(5, 3), vec![0.0; 3]);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ZerosInitializer;

impl Initializer for ZerosInitializer {
    fn initialize(&self, _id: i64, dim: usize) -> Vec<f32> {
        vec![0.0; dim]
    }

    fn name(&self) -> &str {
        "zeros"
    }
}

/// Every row starts at the same value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantInitializer(f32);

impl ConstantInitializer {
    /// Fills rows with `value`.
    pub fn new(value: f32) -> Self {
        Self(value)
    }

    /// Returns the fill value.
    pub fn value(&self) -> f32 {
        self.0
    }
}

impl Initializer for ConstantInitializer {
    fn initialize(&self, _id: i64, dim: usize) -> Vec<f32> {
        vec![self.0; dim]
    }

    fn name(&self) -> &str {
        "constant"
    }
}

/// Uniform values in `[low, high)` drawn from a generator keyed by `(seed, id)`.
///
/// ```
/// use embshard_hash_table::initializer::{Initializer, SeededUniformInitializer};
///
/// let init = SeededUniformInitializer::new(7, -1.0, 1.0);
/// assert_eq!(init.initialize(42, 8), init.initialize(42, 8));
/// assert_ne!(init.initialize(42, 8), init.initialize(43, 8));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeededUniformInitializer {
    seed: u64,
    low: f32,
    high: f32,
}

impl SeededUniformInitializer {
    /// Creates the initializer.
    ///
    /// # Panics
    ///
    /// Panics unless `low < high`.
    pub fn new(seed: u64, low: f32, high: f32) -> Self {
        assert!(low < high, "empty range [{low}, {high})");
        Self { seed, low, high }
    }

    /// Returns the seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Initializer for SeededUniformInitializer {
    fn initialize(&self, id: i64, dim: usize) -> Vec<f32> {
        // Fibonacci hashing spreads neighbouring ids across the seed space.
        let key = self.seed ^ (id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let mut rng = StdRng::seed_from_u64(key);
        (0..dim).map(|_| rng.gen_range(self.low..self.high)).collect()
    }

    fn name(&self) -> &str {
        "seeded_uniform"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant() {
        let init = ConstantInitializer::new(0.5);
        assert_eq!(init.initialize(9, 2), vec![0.5; 2]);
        assert_eq!(init.value(), 0.5);
        assert_eq!(init.name(), "constant");
    }

    #[test]
    fn test_seeded_uniform_depends_on_seed_and_id() {
        let a = SeededUniformInitializer::new(1, 0.0, 1.0);
        let b = SeededUniformInitializer::new(1, 0.0, 1.0);
        let c = SeededUniformInitializer::new(2, 0.0, 1.0);
        assert_eq!(a.initialize(5, 16), b.initialize(5, 16));
        assert_ne!(a.initialize(5, 16), c.initialize(5, 16));
        assert!(a.initialize(5, 16).iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    #[should_panic(expected = "empty range")]
    fn test_seeded_uniform_rejects_empty_range() {
        SeededUniformInitializer::new(0, 1.0, 1.0);
    }
}
