//! Collective communication used by the sharded embedding pipeline.
//!
//! A [`Transport`] connects one worker to its process group. Every collective
//! is *issued* synchronously (the local contribution leaves immediately) and
//! *completed* through the returned [`Awaitable`]. All workers must issue the
//! same collectives in the same order.

use std::sync::Arc;

use embshard_core::{RankInfo, Result, ShardingError};
use embshard_tensor::NdArrayTensor;

use crate::awaitable::Awaitable;

/// A typed buffer exchanged in an all-to-all.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Ids or counters.
    I64(Vec<i64>),
    /// Lengths.
    U32(Vec<u32>),
    /// Weights.
    F32(Vec<f32>),
}

impl Payload {
    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        match self {
            Payload::I64(v) => v.len(),
            Payload::U32(v) => v.len(),
            Payload::F32(v) => v.len(),
        }
    }

    /// Returns whether the buffer has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> &'static str {
        match self {
            Payload::I64(_) => "i64",
            Payload::U32(_) => "u32",
            Payload::F32(_) => "f32",
        }
    }

    /// Unwraps an `I64` buffer.
    pub fn into_i64(self, op: &'static str) -> Result<Vec<i64>> {
        match self {
            Payload::I64(v) => Ok(v),
            other => Err(kind_mismatch(op, "i64", &other)),
        }
    }

    /// Unwraps a `U32` buffer.
    pub fn into_u32(self, op: &'static str) -> Result<Vec<u32>> {
        match self {
            Payload::U32(v) => Ok(v),
            other => Err(kind_mismatch(op, "u32", &other)),
        }
    }

    /// Unwraps an `F32` buffer.
    pub fn into_f32(self, op: &'static str) -> Result<Vec<f32>> {
        match self {
            Payload::F32(v) => Ok(v),
            other => Err(kind_mismatch(op, "f32", &other)),
        }
    }
}

fn kind_mismatch(op: &'static str, expected: &str, got: &Payload) -> ShardingError {
    ShardingError::exchange(
        op,
        format!("expected a {expected} buffer, received {}", got.kind()),
    )
}

/// The collectives a worker needs to take part in row-wise sharding.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Returns this worker's rank and the group size.
    fn rank_info(&self) -> RankInfo;

    /// Issues an all-to-all.
    ///
    /// `sends[d]` is delivered to rank `d`. The completed result is indexed by
    /// source rank: entry `s` holds what rank `s` sent to this worker.
    fn all_to_all(&self, sends: Vec<Vec<Payload>>) -> Result<Awaitable<Vec<Vec<Payload>>>>;

    /// Issues a sum reduce-scatter over the leading dimension.
    ///
    /// `input` has shape `[world_size * rows, cols]`. Every worker contributes
    /// the same shape; rank `r` receives the element-wise sum of every
    /// worker's block `r`, shaped `[rows, cols]`.
    fn reduce_scatter(&self, input: NdArrayTensor) -> Result<Awaitable<NdArrayTensor>>;

    /// Blocks until every worker in the group has reached the barrier.
    async fn barrier(&self) -> Result<()> {
        let world_size = self.rank_info().world_size();
        self.all_to_all(vec![Vec::new(); world_size])?
            .wait()
            .await
            .map(|_| ())
    }
}

/// Convenience alias for shared transports.
pub type SharedTransport = Arc<dyn Transport>;

/// Checks that an all-to-all addresses every rank exactly once.
pub(crate) fn check_destinations<T>(
    op: &'static str,
    sends: &[T],
    world_size: usize,
) -> Result<()> {
    if sends.len() != world_size {
        return Err(ShardingError::invalid_input(format!(
            "{op} needs one send buffer per rank: got {}, world size is {world_size}",
            sends.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_accessors() {
        let p = Payload::U32(vec![1, 2, 3]);
        assert_eq!(p.len(), 3);
        assert!(!p.is_empty());
        assert_eq!(p.into_u32("test").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_payload_kind_mismatch_is_exchange_error() {
        let err = Payload::F32(vec![0.5]).into_i64("all_to_all").unwrap_err();
        assert!(matches!(err, ShardingError::Exchange { op: "all_to_all", .. }));
        assert!(err.to_string().contains("expected a i64 buffer"));
    }

    #[test]
    fn test_check_destinations() {
        assert!(check_destinations("all_to_all", &[0, 1], 2).is_ok());
        assert!(matches!(
            check_destinations("all_to_all", &[0], 2),
            Err(ShardingError::InvalidInput { .. })
        ));
    }
}
