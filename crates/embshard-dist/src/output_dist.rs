//! Row-wise output distribution for variable per-worker batch sizes.
//!
//! After the lookup, each worker holds partial pooled embeddings for every
//! example of every rank, stacked by origin rank. The segments differ in
//! length, so they are zero-padded to the largest batch size before a
//! reduce-scatter; each worker then narrows its reduced block back to its own
//! batch size. Padding rows are zero on every worker and never reach a
//! narrowed output.

use tracing::debug;

use embshard_core::{RankInfo, Result, ShardingError};
use embshard_tensor::{pack_segments, NdArrayTensor, Tensor};

use crate::awaitable::Awaitable;
use crate::context::VariableBatchShardingContext;
use crate::transport::SharedTransport;

/// Returns pooled embeddings to the ranks their examples came from.
pub trait PooledEmbeddingDist: Send {
    /// Issues the output exchange for `local_embs`, shaped
    /// `[sum(batch_size_per_rank), width]`.
    fn forward(
        &self,
        local_embs: NdArrayTensor,
        ctx: &VariableBatchShardingContext,
    ) -> Result<Awaitable<NdArrayTensor>>;
}

/// Pads, reduce-scatters and narrows pooled embeddings.
pub struct VariableBatchRwPooledEmbeddingDist {
    transport: SharedTransport,
    rank_info: RankInfo,
}

impl VariableBatchRwPooledEmbeddingDist {
    /// Creates the output dist over `transport`'s group.
    pub fn new(transport: SharedTransport) -> Self {
        let rank_info = transport.rank_info();
        Self {
            transport,
            rank_info,
        }
    }
}

impl PooledEmbeddingDist for VariableBatchRwPooledEmbeddingDist {
    fn forward(
        &self,
        local_embs: NdArrayTensor,
        ctx: &VariableBatchShardingContext,
    ) -> Result<Awaitable<NdArrayTensor>> {
        let world_size = self.rank_info.world_size();
        let batch_size_per_rank = ctx.batch_size_per_rank();
        if batch_size_per_rank.len() != world_size {
            return Err(ShardingError::invalid_input(format!(
                "batch_size_per_rank has {} entries for {world_size} ranks",
                batch_size_per_rank.len()
            )));
        }
        if local_embs.ndim() != 2 {
            return Err(ShardingError::invalid_input(format!(
                "pooled embeddings must be 2-D, got shape {:?}",
                local_embs.shape()
            )));
        }
        let rows = local_embs.rows();
        if ctx.total_batch_size() != rows {
            return Err(ShardingError::invalid_input(format!(
                "batch_size_per_rank {batch_size_per_rank:?} covers {} rows, embeddings have {rows}",
                ctx.total_batch_size()
            )));
        }

        let width = local_embs.row_width();
        let max_length = ctx.max_length();
        let batch_size = batch_size_per_rank[self.rank_info.rank()];
        if max_length == 0 {
            return Ok(Awaitable::ready(NdArrayTensor::zeros(&[0, width])));
        }

        let packed = pack_segments(&local_embs, batch_size_per_rank, max_length)?;
        let padded = packed.view_rows(world_size * max_length)?;
        debug!(
            rank = self.rank_info.rank(),
            max_length,
            padded_shape = ?padded.shape(),
            "packed pooled embeddings"
        );
        let reduced = self.transport.reduce_scatter(padded)?;
        Ok(reduced.map(move |block| Ok(block.narrow(0, 0, batch_size)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalGroup;
    use std::sync::Arc;

    #[test]
    fn test_context_must_cover_every_rank() {
        let transport = LocalGroup::new(2).unwrap().remove(0);
        let dist = VariableBatchRwPooledEmbeddingDist::new(Arc::new(transport));
        let ctx = VariableBatchShardingContext::new(vec![2]);
        let err = dist.forward(NdArrayTensor::zeros(&[2, 4]), &ctx).unwrap_err();
        assert!(matches!(err, ShardingError::InvalidInput { .. }));
    }

    #[test]
    fn test_context_must_match_rows() {
        let transport = LocalGroup::new(2).unwrap().remove(0);
        let dist = VariableBatchRwPooledEmbeddingDist::new(Arc::new(transport));
        let ctx = VariableBatchShardingContext::new(vec![2, 3]);
        let err = dist.forward(NdArrayTensor::zeros(&[4, 4]), &ctx).unwrap_err();
        assert!(err.to_string().contains("covers 5 rows"));
    }

    #[tokio::test]
    async fn test_single_rank_is_passthrough() {
        let transport = LocalGroup::new(1).unwrap().remove(0);
        let dist = VariableBatchRwPooledEmbeddingDist::new(Arc::new(transport));
        let local = NdArrayTensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let out = dist
            .forward(local.clone(), &VariableBatchShardingContext::new(vec![2]))
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(out, local);
    }

    #[tokio::test]
    async fn test_empty_step_skips_exchange() {
        let transport = LocalGroup::new(2).unwrap().remove(1);
        let dist = VariableBatchRwPooledEmbeddingDist::new(Arc::new(transport));
        let out = dist
            .forward(NdArrayTensor::zeros(&[0, 3]), &VariableBatchShardingContext::new(vec![0, 0]))
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(out.shape(), &[0, 3]);
    }
}
