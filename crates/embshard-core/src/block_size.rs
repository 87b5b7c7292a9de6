//! Per-feature row-wise block sizes.
//!
//! Row-wise sharding splits each feature's id space `[0, hash_size)` into
//! `world_size` contiguous blocks of `ceil(hash_size / world_size)` ids. Block
//! `p` is owned by rank `p`. Every worker derives the same table independently
//! from the shared configuration, so bucket boundaries agree without any
//! communication.

use crate::device::{Device, Placed};

/// Returns `ceil(hash_size / world_size)`.
///
/// # Panics
///
/// Panics if `world_size` is zero.
#[inline]
pub fn block_size_for(hash_size: u64, world_size: usize) -> u64 {
    assert!(world_size > 0, "world_size must be positive");
    hash_size.div_ceil(world_size as u64)
}

/// Maps `id` to `(shard, local_id)`.
///
/// Ids inside the blocked range land in shard `id / block_size` at local id
/// `id % block_size`. Ids at or beyond `block_size * world_size` (or any id
/// when `block_size` is zero) fall back to shard `id % world_size` at local id
/// `id / world_size`, so every id lands in exactly one shard in `[0, world_size)`.
///
/// # Examples
///
/// ```
/// use embshard_core::block_size::bucket_for_id;
///
/// // hash_size 10 over 2 workers -> block size 5.
/// assert_eq!(bucket_for_id(2, 5, 2), (0, 2));
/// assert_eq!(bucket_for_id(7, 5, 2), (1, 2));
/// assert_eq!(bucket_for_id(9, 5, 2), (1, 4));
/// ```
#[inline]
pub fn bucket_for_id(id: u64, block_size: u64, world_size: usize) -> (usize, u64) {
    let w = world_size as u64;
    if block_size > 0 && id < block_size.saturating_mul(w) {
        ((id / block_size) as usize, id % block_size)
    } else {
        ((id % w) as usize, id / w)
    }
}

/// Immutable table of block sizes, one per feature, computed at construction.
///
/// # Examples
///
/// ```
/// use embshard_core::{BlockSizeTable, Device};
///
/// let table = BlockSizeTable::new(&[10, 7, 1], 2, Device::Cpu);
/// assert_eq!(table.as_slice(), &[5, 4, 1]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSizeTable {
    block_sizes: Placed<Vec<u64>>,
    world_size: usize,
}

impl BlockSizeTable {
    /// Computes the block size of every feature for a group of `world_size` workers.
    ///
    /// # Panics
    ///
    /// Panics if `world_size` is zero.
    pub fn new(hash_sizes: &[u64], world_size: usize, device: Device) -> Self {
        let block_sizes = hash_sizes
            .iter()
            .map(|&h| block_size_for(h, world_size))
            .collect();
        Self {
            block_sizes: Placed::new(device, block_sizes),
            world_size,
        }
    }

    /// Returns the block size of feature `f`.
    #[inline]
    pub fn get(&self, f: usize) -> u64 {
        self.block_sizes.value[f]
    }

    /// Returns all block sizes in feature order.
    #[inline]
    pub fn as_slice(&self) -> &[u64] {
        &self.block_sizes.value
    }

    /// Returns the number of features.
    #[inline]
    pub fn len(&self) -> usize {
        self.block_sizes.value.len()
    }

    /// Returns whether the table has no features.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.block_sizes.value.is_empty()
    }

    /// Returns the world size the table was computed for.
    #[inline]
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Returns the device the table was placed on.
    #[inline]
    pub fn device(&self) -> Device {
        self.block_sizes.device
    }

    /// Maps an id of feature `f` to `(shard, local_id)`.
    #[inline]
    pub fn bucket(&self, f: usize, id: u64) -> (usize, u64) {
        bucket_for_id(id, self.get(f), self.world_size)
    }
}
