//! Row-wise input distribution for variable per-worker batch sizes.

use tracing::{debug, info};

use embshard_core::{
    BlockSizeTable, JaggedFeatures, RankInfo, Result, ShardingConfig, ShardingError,
    SparseFeatures, Stage,
};

use crate::awaitable::Awaitable;
use crate::bucketize::{bucketize_features, BucketizedFeatures};
use crate::sparse_dist::SparseFeaturesAllToAll;
use crate::transport::SharedTransport;

/// Redistributes sparse features to the workers that own their rows.
pub trait SparseFeaturesDist: Send {
    /// Bucketizes `features` locally and issues the exchange.
    ///
    /// Awaiting the outer handle issues the data round of the exchange;
    /// awaiting the inner handle yields the shard-local features.
    fn forward(
        &mut self,
        features: SparseFeatures,
    ) -> Result<Awaitable<Awaitable<SparseFeatures>>>;

    /// Returns the permutation restoring the original id-list order of the
    /// last forwarded batch, if one was computed.
    fn unbucketize_permute(&self) -> Option<&[usize]> {
        None
    }
}

/// Bucketizes by block size, then runs a variable-batch all-to-all.
pub struct VariableBatchRwSparseFeaturesDist {
    rank_info: RankInfo,
    id_list_block_sizes: BlockSizeTable,
    id_score_list_block_sizes: BlockSizeTable,
    has_feature_processor: bool,
    output_permute: bool,
    dist: SparseFeaturesAllToAll,
    unbucketize_permute: Option<Vec<usize>>,
}

impl VariableBatchRwSparseFeaturesDist {
    /// Builds the input dist for `transport`'s group from `config`.
    pub fn new(transport: SharedTransport, config: &ShardingConfig) -> Result<Self> {
        config.validate()?;
        let rank_info = transport.rank_info();
        if rank_info.world_size() != config.world_size {
            return Err(ShardingError::config(format!(
                "transport group has {} ranks, config expects {}",
                rank_info.world_size(),
                config.world_size
            )));
        }
        let id_list_block_sizes = config.id_list_block_sizes();
        let id_score_list_block_sizes = config.id_score_list_block_sizes();
        info!(
            rank = rank_info.rank(),
            world_size = rank_info.world_size(),
            id_list_block_sizes = ?id_list_block_sizes.as_slice(),
            id_score_list_block_sizes = ?id_score_list_block_sizes.as_slice(),
            "created row-wise input dist"
        );
        Ok(Self {
            rank_info,
            id_list_block_sizes,
            id_score_list_block_sizes,
            has_feature_processor: config.has_feature_processor,
            output_permute: config.output_permute,
            dist: SparseFeaturesAllToAll::new(
                transport,
                config.id_list_keys(),
                config.id_score_list_keys(),
            ),
            unbucketize_permute: None,
        })
    }

    /// Returns the id-list block sizes.
    pub fn id_list_block_sizes(&self) -> &BlockSizeTable {
        &self.id_list_block_sizes
    }

    /// Returns the id-score-list block sizes.
    pub fn id_score_list_block_sizes(&self) -> &BlockSizeTable {
        &self.id_score_list_block_sizes
    }
}

fn check_presence(
    kind: &str,
    features: Option<&JaggedFeatures>,
    configured: usize,
) -> Result<()> {
    match (features, configured) {
        (Some(_), 0) => Err(ShardingError::out_of_range(format!(
            "{kind} features supplied but none are configured"
        ))),
        (None, n) if n > 0 => Err(ShardingError::out_of_range(format!(
            "{n} {kind} features configured but none supplied"
        ))),
        _ => Ok(()),
    }
}

fn bucketize_kind(
    features: Option<&JaggedFeatures>,
    block_sizes: &BlockSizeTable,
    bucketize_pos: bool,
    output_permute: bool,
) -> Result<(Option<BucketizedFeatures>, Option<Vec<usize>>)> {
    match features {
        Some(jt) => {
            let (bucketized, permute) =
                bucketize_features(jt, block_sizes, bucketize_pos, output_permute)
                    .map_err(|e| e.at_stage(Stage::Bucketize))?;
            Ok((Some(bucketized), permute))
        }
        None => Ok((None, None)),
    }
}

impl SparseFeaturesDist for VariableBatchRwSparseFeaturesDist {
    fn forward(
        &mut self,
        features: SparseFeatures,
    ) -> Result<Awaitable<Awaitable<SparseFeatures>>> {
        check_presence(
            "id list",
            features.id_list_features.as_ref(),
            self.id_list_block_sizes.len(),
        )?;
        check_presence(
            "id score list",
            features.id_score_list_features.as_ref(),
            self.id_score_list_block_sizes.len(),
        )?;
        let batch_size = features.batch_size()?;

        let (id_list, permute) = bucketize_kind(
            features.id_list_features.as_ref(),
            &self.id_list_block_sizes,
            self.has_feature_processor,
            self.output_permute,
        )?;
        let (id_score_list, _) = bucketize_kind(
            features.id_score_list_features.as_ref(),
            &self.id_score_list_block_sizes,
            false,
            false,
        )?;
        self.unbucketize_permute = permute;

        debug!(
            rank = self.rank_info.rank(),
            batch_size, "bucketized local features"
        );
        self.dist.forward(id_list, id_score_list, batch_size)
    }

    fn unbucketize_permute(&self) -> Option<&[usize]> {
        self.unbucketize_permute.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalGroup;
    use embshard_core::Feature;
    use std::sync::Arc;

    fn single_rank_dist(config: &ShardingConfig) -> VariableBatchRwSparseFeaturesDist {
        let transport = LocalGroup::new(1).unwrap().remove(0);
        VariableBatchRwSparseFeaturesDist::new(Arc::new(transport), config).unwrap()
    }

    #[test]
    fn test_world_size_mismatch_rejected() {
        let config = ShardingConfig::new(2, 4).with_id_list_feature(Feature::new("f", 10));
        let transport = LocalGroup::new(1).unwrap().remove(0);
        let err = VariableBatchRwSparseFeaturesDist::new(Arc::new(transport), &config)
            .err()
            .unwrap();
        assert!(matches!(err, ShardingError::Config { .. }));
    }

    #[test]
    fn test_unconfigured_score_list_is_out_of_range() {
        let config = ShardingConfig::new(1, 4).with_id_list_feature(Feature::new("f", 10));
        let mut dist = single_rank_dist(&config);
        let list = JaggedFeatures::new(vec!["f".into()], vec![1], vec![1]).unwrap();
        let score =
            JaggedFeatures::with_weights(vec!["s".into()], vec![1], vec![1], vec![0.5]).unwrap();
        let err = dist
            .forward(SparseFeatures::new(Some(list), Some(score)))
            .err()
            .unwrap();
        assert!(matches!(err, ShardingError::OutOfRange { .. }));
    }

    #[test]
    fn test_missing_id_list_is_out_of_range() {
        let config = ShardingConfig::new(1, 4).with_id_list_feature(Feature::new("f", 10));
        let mut dist = single_rank_dist(&config);
        let err = dist.forward(SparseFeatures::default()).err().unwrap();
        assert!(matches!(err, ShardingError::OutOfRange { .. }));
    }

    #[test]
    fn test_bucketize_errors_are_tagged() {
        let config = ShardingConfig::new(1, 4).with_id_list_feature(Feature::new("f", 10));
        let mut dist = single_rank_dist(&config);
        let list = JaggedFeatures::new(vec!["f".into()], vec![-1], vec![1]).unwrap();
        let err = dist.forward(SparseFeatures::id_list(list)).err().unwrap();
        assert_eq!(err.stage(), Some(Stage::Bucketize));
    }

    #[tokio::test]
    async fn test_single_rank_exchange_is_identity() {
        let config = ShardingConfig::new(1, 4)
            .with_id_list_feature(Feature::new("a", 10))
            .with_id_list_feature(Feature::new("b", 5))
            .with_output_permute(true);
        let mut dist = single_rank_dist(&config);
        let list = JaggedFeatures::new(
            vec!["a".into(), "b".into()],
            vec![9, 0, 3, 4],
            vec![2, 0, 1, 1],
        )
        .unwrap();
        let out = dist
            .forward(SparseFeatures::id_list(list.clone()))
            .unwrap()
            .wait()
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        let received = out.id_list_features.unwrap();
        assert_eq!(received.ids(), list.ids());
        assert_eq!(received.lengths(), list.lengths());
        assert_eq!(received.stride_per_rank(), Some(&[2][..]));
        assert_eq!(dist.unbucketize_permute(), Some(&[0, 1, 2, 3][..]));
    }
}
