//! Sharding strategies.
//!
//! A strategy bundles the three stages of a sharded embedding step. Row-wise
//! sharding with variable per-worker batch sizes is the one provided here.

use std::sync::Arc;

use embshard_core::{RankInfo, Result, ShardingConfig, ShardingError};
use embshard_hash_table::{Initializer, ZerosInitializer};

use crate::input_dist::{SparseFeaturesDist, VariableBatchRwSparseFeaturesDist};
use crate::lookup::{EmbeddingLookup, GroupedPooledEmbeddingsLookup};
use crate::output_dist::{PooledEmbeddingDist, VariableBatchRwPooledEmbeddingDist};
use crate::transport::SharedTransport;

/// Creates the input dist, lookup and output dist of one sharding scheme.
pub trait EmbeddingSharding: Send + Sync {
    /// Returns the rank this strategy was built for.
    fn rank_info(&self) -> RankInfo;

    /// Creates the stage that moves sparse features to their owners.
    fn create_input_dist(&self) -> Result<Box<dyn SparseFeaturesDist>>;

    /// Creates the shard-local lookup.
    fn create_lookup(&self) -> Result<Box<dyn EmbeddingLookup>>;

    /// Creates the stage that returns pooled embeddings to their ranks.
    fn create_output_dist(&self) -> Result<Box<dyn PooledEmbeddingDist>>;
}

/// Row-wise sharding of pooled embeddings where ranks may hold different
/// batch sizes.
pub struct VariableBatchRwPooledEmbeddingSharding {
    config: ShardingConfig,
    transport: SharedTransport,
    initializer: Arc<dyn Initializer>,
}

impl VariableBatchRwPooledEmbeddingSharding {
    /// Creates the strategy with zero-initialized tables.
    pub fn new(config: ShardingConfig, transport: SharedTransport) -> Result<Self> {
        config.validate()?;
        let world_size = transport.rank_info().world_size();
        if world_size != config.world_size {
            return Err(ShardingError::config(format!(
                "transport group has {world_size} ranks, config expects {}",
                config.world_size
            )));
        }
        Ok(Self {
            config,
            transport,
            initializer: Arc::new(ZerosInitializer),
        })
    }

    /// Replaces the initializer used for rows the lookup has not seen yet.
    pub fn with_initializer(mut self, initializer: Arc<dyn Initializer>) -> Self {
        self.initializer = initializer;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ShardingConfig {
        &self.config
    }
}

impl EmbeddingSharding for VariableBatchRwPooledEmbeddingSharding {
    fn rank_info(&self) -> RankInfo {
        self.transport.rank_info()
    }

    fn create_input_dist(&self) -> Result<Box<dyn SparseFeaturesDist>> {
        Ok(Box::new(VariableBatchRwSparseFeaturesDist::new(
            self.transport.clone(),
            &self.config,
        )?))
    }

    fn create_lookup(&self) -> Result<Box<dyn EmbeddingLookup>> {
        Ok(Box::new(GroupedPooledEmbeddingsLookup::new(
            &self.config,
            self.rank_info(),
            self.initializer.clone(),
        )))
    }

    fn create_output_dist(&self) -> Result<Box<dyn PooledEmbeddingDist>> {
        Ok(Box::new(VariableBatchRwPooledEmbeddingDist::new(
            self.transport.clone(),
        )))
    }
}
