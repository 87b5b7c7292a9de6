//! Rank identity within a flat communication group.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShardingError};

/// The position of one worker in a group of `world_size` equally ranked workers.
///
/// Passed explicitly to every component that needs it instead of being read
/// from ambient process state.
///
/// # Examples
///
/// ```
/// use embshard_core::RankInfo;
///
/// let info = RankInfo::new(1, 4).unwrap();
/// assert_eq!(info.rank(), 1);
/// assert_eq!(info.world_size(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RankInfo {
    rank: usize,
    world_size: usize,
}

impl RankInfo {
    /// Creates a rank descriptor, validating `rank < world_size`.
    pub fn new(rank: usize, world_size: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(ShardingError::config("world_size must be at least 1"));
        }
        if rank >= world_size {
            return Err(ShardingError::config(format!(
                "rank {rank} out of range for world_size {world_size}"
            )));
        }
        Ok(Self { rank, world_size })
    }

    /// A single-worker group.
    pub fn single() -> Self {
        Self {
            rank: 0,
            world_size: 1,
        }
    }

    /// Returns this worker's rank.
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Returns the number of workers in the group.
    #[inline]
    pub fn world_size(&self) -> usize {
        self.world_size
    }
}
