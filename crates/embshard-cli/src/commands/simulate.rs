//! Simulate Command Implementation
//!
//! Runs every rank of a group in-process and drives random variable-size
//! batches through the sharded pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use embshard_core::{Feature, JaggedFeatures, ShardingConfig, SparseFeatures};
use embshard_dist::{
    LocalGroup, ShardedEmbeddingPipeline, Transport, VariableBatchRwPooledEmbeddingSharding,
};
use embshard_hash_table::SeededUniformInitializer;

/// Run all ranks of a group in one process for a number of steps
///
/// # Example
///
/// ```bash
/// embshard simulate --config sharding.json --steps 20 --max-batch-size 16
/// ```
#[derive(Args, Debug, Clone)]
pub struct SimulateCommand {
    /// Path to the sharding configuration (JSON)
    #[arg(long, short = 'c', env = "EMBSHARD_CONFIG_PATH")]
    pub config: PathBuf,

    /// Number of steps to run
    #[arg(long, default_value = "10")]
    pub steps: u64,

    /// Largest batch a rank draws per step
    #[arg(long, default_value = "8")]
    pub max_batch_size: usize,

    /// Largest number of ids an example holds per feature
    #[arg(long, default_value = "4")]
    pub max_ids_per_example: u32,

    /// Seed for batches and embedding initialization
    #[arg(long, default_value = "42")]
    pub seed: u64,
}

/// What one simulated rank produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RankSummary {
    /// The rank.
    pub rank: usize,
    /// Examples fed and returned over all steps.
    pub examples: usize,
    /// Sum of every returned embedding value.
    pub checksum: f64,
}

impl SimulateCommand {
    /// Execute the simulate command
    pub async fn run(&self) -> Result<()> {
        let config = ShardingConfig::from_json_file(&self.config)
            .with_context(|| format!("Failed to load config {:?}", self.config))?;
        info!(
            world_size = config.world_size,
            steps = self.steps,
            max_batch_size = self.max_batch_size,
            "starting simulation"
        );

        let summaries = self.simulate(config).await?;
        for summary in &summaries {
            info!(
                rank = summary.rank,
                examples = summary.examples,
                checksum = summary.checksum,
                "rank finished"
            );
        }
        Ok(())
    }

    /// Runs the simulation and returns one summary per rank.
    pub async fn simulate(&self, config: ShardingConfig) -> Result<Vec<RankSummary>> {
        let group = LocalGroup::with_timeout(config.world_size, config.collective_timeout())
            .context("Failed to create process group")?;

        let mut handles = Vec::with_capacity(group.len());
        for transport in group {
            let job = self.clone();
            let config = config.clone();
            handles.push(tokio::spawn(async move { job.run_rank(config, transport).await }));
        }

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(handle.await.context("Rank task panicked")??);
        }
        Ok(summaries)
    }

    async fn run_rank(
        &self,
        config: ShardingConfig,
        transport: embshard_dist::LocalTransport,
    ) -> Result<RankSummary> {
        let rank = transport.rank_info().rank();
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let sharding = VariableBatchRwPooledEmbeddingSharding::new(config.clone(), transport.clone())?
            .with_initializer(Arc::new(SeededUniformInitializer::new(self.seed, -0.05, 0.05)));
        let mut pipeline = ShardedEmbeddingPipeline::new(&sharding)?;
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(rank as u64));

        let mut summary = RankSummary {
            rank,
            examples: 0,
            checksum: 0.0,
        };
        for step in 0..self.steps {
            let batch_size = rng.gen_range(0..=self.max_batch_size);
            let features = random_batch(&config, batch_size, self.max_ids_per_example, &mut rng)?;
            let pooled = pipeline
                .forward(features)
                .await
                .with_context(|| format!("rank {rank} failed at step {step}"))?;
            if pooled.rows() != batch_size {
                anyhow::bail!(
                    "rank {rank} step {step}: expected {batch_size} rows, got {}",
                    pooled.rows()
                );
            }
            debug!(rank, step, batch_size, "step finished");
            summary.examples += batch_size;
            summary.checksum += f64::from(pooled.sum());
        }
        transport.barrier().await?;
        Ok(summary)
    }
}

fn random_jagged(
    features: &[Feature],
    batch_size: usize,
    max_ids: u32,
    weighted: bool,
    rng: &mut StdRng,
) -> Result<Option<JaggedFeatures>> {
    if features.is_empty() {
        return Ok(None);
    }
    let keys = features.iter().map(|f| f.name().to_string()).collect();
    let mut ids = Vec::new();
    let mut lengths = Vec::with_capacity(features.len() * batch_size);
    for feature in features {
        for _ in 0..batch_size {
            let len = rng.gen_range(0..=max_ids);
            lengths.push(len);
            ids.extend((0..len).map(|_| rng.gen_range(0..feature.hash_size()) as i64));
        }
    }
    let jagged = if weighted {
        let scores = (0..ids.len()).map(|_| rng.gen::<f32>()).collect();
        JaggedFeatures::with_weights(keys, ids, lengths, scores)?
    } else {
        JaggedFeatures::new(keys, ids, lengths)?
    };
    Ok(Some(jagged))
}

/// Draws a batch of `batch_size` examples over every configured feature.
pub fn random_batch(
    config: &ShardingConfig,
    batch_size: usize,
    max_ids: u32,
    rng: &mut StdRng,
) -> Result<SparseFeatures> {
    Ok(SparseFeatures::new(
        random_jagged(&config.id_list_features, batch_size, max_ids, false, rng)?,
        random_jagged(&config.id_score_list_features, batch_size, max_ids, true, rng)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(steps: u64) -> SimulateCommand {
        SimulateCommand {
            config: PathBuf::from("unused.json"),
            steps,
            max_batch_size: 5,
            max_ids_per_example: 3,
            seed: 7,
        }
    }

    fn config() -> ShardingConfig {
        ShardingConfig::new(3, 4)
            .with_id_list_feature(Feature::new("user", 100))
            .with_id_list_feature(Feature::new("page", 7))
            .with_id_score_list_feature(Feature::weighted("item", 50))
    }

    #[test]
    fn test_random_batch_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let batch = random_batch(&config(), 4, 3, &mut rng).unwrap();
        let list = batch.id_list_features.unwrap();
        assert_eq!(list.num_features(), 2);
        assert_eq!(list.stride(), 4);
        assert!(list.ids().iter().all(|&id| (0..100).contains(&id)));
        assert!(batch.id_score_list_features.unwrap().weights().is_some());
    }

    #[tokio::test]
    async fn test_simulation_is_deterministic() {
        let first = command(4).simulate(config()).await.unwrap();
        let second = command(4).simulate(config()).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }
}
