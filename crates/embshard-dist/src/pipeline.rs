//! Per-step driver of a sharded embedding module.

use tracing::{debug, info};

use embshard_core::{RankInfo, Result, ShardingError, SparseFeatures, Stage};
use embshard_tensor::NdArrayTensor;

use crate::context::VariableBatchShardingContext;
use crate::input_dist::SparseFeaturesDist;
use crate::lookup::EmbeddingLookup;
use crate::output_dist::PooledEmbeddingDist;
use crate::sharding::EmbeddingSharding;

fn at(stage: Stage) -> impl Fn(ShardingError) -> ShardingError {
    move |e| e.at_stage(stage)
}

/// Runs input dist, lookup and output dist for one worker.
///
/// Every worker of the group must call [`forward`](Self::forward) once per
/// step. Errors name the stage that produced them.
pub struct ShardedEmbeddingPipeline {
    rank_info: RankInfo,
    input_dist: Box<dyn SparseFeaturesDist>,
    lookup: Box<dyn EmbeddingLookup>,
    output_dist: Box<dyn PooledEmbeddingDist>,
    steps: u64,
}

impl ShardedEmbeddingPipeline {
    /// Builds the three stages from a sharding strategy.
    pub fn new(sharding: &dyn EmbeddingSharding) -> Result<Self> {
        let rank_info = sharding.rank_info();
        let pipeline = Self {
            rank_info,
            input_dist: sharding.create_input_dist()?,
            lookup: sharding.create_lookup()?,
            output_dist: sharding.create_output_dist()?,
            steps: 0,
        };
        info!(
            rank = rank_info.rank(),
            output_width = pipeline.lookup.output_width(),
            "sharded embedding pipeline ready"
        );
        Ok(pipeline)
    }

    /// Returns pooled embeddings for this worker's examples, `[batch_size, width]`.
    pub async fn forward(&mut self, features: SparseFeatures) -> Result<NdArrayTensor> {
        let issued = self.input_dist.forward(features).map_err(at(Stage::InputDist))?;
        let exchange = issued.wait().await.map_err(at(Stage::InputDist))?;
        let local = exchange.wait().await.map_err(at(Stage::InputDist))?;
        let ctx = VariableBatchShardingContext::from_features(&local).map_err(at(Stage::InputDist))?;

        let pooled = self.lookup.forward(&local).map_err(at(Stage::Lookup))?;

        let output = self
            .output_dist
            .forward(pooled, &ctx)
            .map_err(at(Stage::OutputDist))?
            .wait()
            .await
            .map_err(at(Stage::OutputDist))?;

        self.steps += 1;
        debug!(
            rank = self.rank_info.rank(),
            step = self.steps,
            batch_size_per_rank = ?ctx.batch_size_per_rank(),
            "step complete"
        );
        Ok(output)
    }

    /// Returns the id-list unbucketize permutation of the last step, if any.
    pub fn unbucketize_permute(&self) -> Option<&[usize]> {
        self.input_dist.unbucketize_permute()
    }

    /// Returns the lookup stage.
    pub fn lookup(&self) -> &dyn EmbeddingLookup {
        self.lookup.as_ref()
    }

    /// Returns how many steps completed.
    pub fn steps(&self) -> u64 {
        self.steps
    }
}
