//! Shard-local pooled embedding lookup.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use embshard_core::{JaggedFeatures, RankInfo, Result, ShardingConfig, ShardingError, SparseFeatures};
use embshard_hash_table::{EmbeddingHashTable, HashTableError, Initializer, ShardTable};
use embshard_tensor::NdArrayTensor;

/// Computes one pooled vector per example and owned feature.
pub trait EmbeddingLookup: Send + Sync {
    /// Returns a `[stride, output_width()]` tensor for redistributed features.
    fn forward(&self, features: &SparseFeatures) -> Result<NdArrayTensor>;

    /// Returns the width of one output row.
    fn output_width(&self) -> usize;
}

fn lookup_error(feature: &str, err: HashTableError) -> ShardingError {
    ShardingError::Lookup {
        message: format!("feature '{feature}': {err}"),
    }
}

/// The two feature kinds a lookup owns tables for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    /// Unweighted id lists; any carried weights are ignored.
    IdList,
    /// Id lists whose embeddings are scaled by their scores.
    IdScoreList,
}

/// Sum-pooled lookup over one [`ShardTable`] per feature.
///
/// Output columns hold the id-list features first, then the id-score-list
/// features, `embedding_dim` columns each.
pub struct GroupedPooledEmbeddingsLookup {
    rank_info: RankInfo,
    embedding_dim: usize,
    id_list_tables: Vec<RwLock<ShardTable>>,
    id_score_list_tables: Vec<RwLock<ShardTable>>,
}

impl GroupedPooledEmbeddingsLookup {
    /// Creates the tables this rank owns, each sized to its feature's block.
    pub fn new(
        config: &ShardingConfig,
        rank_info: RankInfo,
        initializer: Arc<dyn Initializer>,
    ) -> Self {
        let tables = |block_sizes: &[u64]| -> Vec<RwLock<ShardTable>> {
            block_sizes
                .iter()
                .map(|&rows| {
                    RwLock::new(ShardTable::with_initializer(
                        rows as usize,
                        config.embedding_dim,
                        initializer.clone(),
                    ))
                })
                .collect()
        };
        Self {
            rank_info,
            embedding_dim: config.embedding_dim,
            id_list_tables: tables(config.id_list_block_sizes().as_slice()),
            id_score_list_tables: tables(config.id_score_list_block_sizes().as_slice()),
        }
    }

    /// Returns the table backing feature `f` of `kind`.
    pub fn table(&self, kind: FeatureKind, f: usize) -> Option<&RwLock<ShardTable>> {
        match kind {
            FeatureKind::IdList => self.id_list_tables.get(f),
            FeatureKind::IdScoreList => self.id_score_list_tables.get(f),
        }
    }

    fn pool_kind(
        &self,
        features: Option<&JaggedFeatures>,
        tables: &[RwLock<ShardTable>],
        use_weights: bool,
        column_offset: usize,
        output: &mut [f32],
        stride: usize,
    ) -> Result<()> {
        let Some(jt) = features else {
            return Ok(());
        };
        if jt.num_features() != tables.len() {
            return Err(ShardingError::out_of_range(format!(
                "{} features supplied to lookup, {} tables owned",
                jt.num_features(),
                tables.len()
            )));
        }
        let width = self.output_width();
        let dim = self.embedding_dim;
        let offsets = jt.offsets();
        let weights = if use_weights { jt.weights() } else { None };
        for (f, table) in tables.iter().enumerate() {
            let key = &jt.keys()[f];
            let range = offsets[f * stride]..offsets[(f + 1) * stride];
            table
                .write()
                .initialize_missing(&jt.ids()[range])
                .map_err(|e| lookup_error(key, e))?;

            let table = table.read();
            let column = column_offset + f * dim;
            for b in 0..stride {
                let (start, end) = (offsets[f * stride + b], offsets[f * stride + b + 1]);
                let row = &mut output[b * width + column..b * width + column + dim];
                table
                    .pooled_lookup(&jt.ids()[start..end], weights.map(|w| &w[start..end]), row)
                    .map_err(|e| lookup_error(key, e))?;
            }
        }
        Ok(())
    }
}

impl EmbeddingLookup for GroupedPooledEmbeddingsLookup {
    fn forward(&self, features: &SparseFeatures) -> Result<NdArrayTensor> {
        let stride = features.batch_size()?;
        let width = self.output_width();
        let mut output = vec![0.0f32; stride * width];

        self.pool_kind(
            features.id_list_features.as_ref(),
            &self.id_list_tables,
            false,
            0,
            &mut output,
            stride,
        )?;
        self.pool_kind(
            features.id_score_list_features.as_ref(),
            &self.id_score_list_tables,
            true,
            self.id_list_tables.len() * self.embedding_dim,
            &mut output,
            stride,
        )?;

        debug!(
            rank = self.rank_info.rank(),
            rows = stride,
            width,
            "pooled local embeddings"
        );
        Ok(NdArrayTensor::from_vec(output, &[stride, width])?)
    }

    fn output_width(&self) -> usize {
        self.embedding_dim * (self.id_list_tables.len() + self.id_score_list_tables.len())
    }
}
