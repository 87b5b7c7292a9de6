//! Plan Command Implementation
//!
//! Prints how a configuration splits every feature's id space across ranks.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::info;

use embshard_core::{block_size_for, Feature, ShardingConfig};

/// Row range one rank owns for a feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankRows {
    /// Owning rank.
    pub rank: usize,
    /// First global id owned, inclusive.
    pub start: u64,
    /// Last global id owned, exclusive.
    pub end: u64,
}

/// Placement of one feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeaturePlan {
    /// Feature name.
    pub name: String,
    /// `id_list` or `id_score_list`.
    pub kind: &'static str,
    /// Number of legal ids.
    pub hash_size: u64,
    /// Ids per rank.
    pub block_size: u64,
    /// Rows owned by each rank.
    pub ranks: Vec<RankRows>,
}

/// Placement of every feature of a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardingPlan {
    /// Number of ranks.
    pub world_size: usize,
    /// Width of each pooled output row.
    pub output_width: usize,
    /// Per-feature placement, id-list features first.
    pub features: Vec<FeaturePlan>,
}

impl ShardingPlan {
    /// Computes the plan for a validated configuration.
    pub fn from_config(config: &ShardingConfig) -> Self {
        let world_size = config.world_size;
        let feature_plan = |feature: &Feature, kind: &'static str| {
            let hash_size = feature.hash_size();
            let block_size = block_size_for(hash_size, world_size);
            let ranks = (0..world_size)
                .map(|rank| {
                    let start = (rank as u64 * block_size).min(hash_size);
                    let end = (start + block_size).min(hash_size);
                    RankRows { rank, start, end }
                })
                .collect();
            FeaturePlan {
                name: feature.name().to_string(),
                kind,
                hash_size,
                block_size,
                ranks,
            }
        };

        let features: Vec<FeaturePlan> = config
            .id_list_features
            .iter()
            .map(|f| feature_plan(f, "id_list"))
            .chain(
                config
                    .id_score_list_features
                    .iter()
                    .map(|f| feature_plan(f, "id_score_list")),
            )
            .collect();
        Self {
            world_size,
            output_width: config.embedding_dim * features.len(),
            features,
        }
    }
}

/// Print the row-wise placement of a configuration
///
/// # Example
///
/// ```bash
/// embshard plan --config sharding.json --json
/// ```
#[derive(Args, Debug, Clone)]
pub struct PlanCommand {
    /// Path to the sharding configuration (JSON)
    #[arg(long, short = 'c', env = "EMBSHARD_CONFIG_PATH")]
    pub config: PathBuf,

    /// Print the plan as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

impl PlanCommand {
    /// Execute the plan command
    pub async fn run(&self) -> Result<()> {
        let config = ShardingConfig::from_json_file(&self.config)
            .with_context(|| format!("Failed to load config {:?}", self.config))?;
        let plan = ShardingPlan::from_config(&config);
        info!(
            world_size = plan.world_size,
            features = plan.features.len(),
            "computed sharding plan"
        );

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?
            );
        } else {
            print!("{}", render_table(&plan));
        }
        Ok(())
    }
}

fn render_table(plan: &ShardingPlan) -> String {
    let mut out = format!(
        "world_size={} output_width={}\n",
        plan.world_size, plan.output_width
    );
    for feature in &plan.features {
        out.push_str(&format!(
            "{:<16} {:<14} hash_size={:<10} block_size={}\n",
            feature.name, feature.kind, feature.hash_size, feature.block_size
        ));
        for rows in &feature.ranks {
            out.push_str(&format!(
                "    rank {:>3}: [{}, {})\n",
                rows.rank, rows.start, rows.end
            ));
        }
    }
    out
}
