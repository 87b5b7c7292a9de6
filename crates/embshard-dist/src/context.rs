//! Per-step sharding context.

use embshard_core::{Result, ShardingError, SparseFeatures};

/// How many examples every rank contributed to the current step.
///
/// All workers hold the same context before the output stage runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VariableBatchShardingContext {
    batch_size_per_rank: Vec<usize>,
}

impl VariableBatchShardingContext {
    /// Creates a context from explicit per-rank batch sizes.
    pub fn new(batch_size_per_rank: Vec<usize>) -> Self {
        Self {
            batch_size_per_rank,
        }
    }

    /// Reads the per-rank batch sizes recorded on redistributed features.
    pub fn from_features(features: &SparseFeatures) -> Result<Self> {
        let recorded = [
            features.id_list_features.as_ref(),
            features.id_score_list_features.as_ref(),
        ]
        .into_iter()
        .flatten()
        .map(|jt| jt.stride_per_rank());

        let mut batch_size_per_rank: Option<&[usize]> = None;
        for stride_per_rank in recorded {
            let stride_per_rank = stride_per_rank.ok_or_else(|| {
                ShardingError::invalid_input("features were not redistributed across ranks")
            })?;
            match batch_size_per_rank {
                Some(seen) if seen != stride_per_rank => {
                    return Err(ShardingError::invalid_input(format!(
                        "feature kinds disagree on batch sizes: {seen:?} vs {stride_per_rank:?}"
                    )))
                }
                _ => batch_size_per_rank = Some(stride_per_rank),
            }
        }
        batch_size_per_rank
            .map(|b| Self::new(b.to_vec()))
            .ok_or_else(|| ShardingError::invalid_input("no sparse features to take batch sizes from"))
    }

    /// Returns the batch size of every rank.
    pub fn batch_size_per_rank(&self) -> &[usize] {
        &self.batch_size_per_rank
    }

    /// Returns the batch sizes in the integer form collectives consume.
    pub fn batch_size_per_rank_tensor(&self) -> Vec<i64> {
        self.batch_size_per_rank.iter().map(|&b| b as i64).collect()
    }

    /// Returns the largest batch size across ranks.
    pub fn max_length(&self) -> usize {
        self.batch_size_per_rank.iter().copied().max().unwrap_or(0)
    }

    /// Returns the total number of examples across ranks.
    pub fn total_batch_size(&self) -> usize {
        self.batch_size_per_rank.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embshard_core::JaggedFeatures;

    #[test]
    fn test_accessors() {
        let ctx = VariableBatchShardingContext::new(vec![3, 5, 2]);
        assert_eq!(ctx.max_length(), 5);
        assert_eq!(ctx.total_batch_size(), 10);
        assert_eq!(ctx.batch_size_per_rank_tensor(), vec![3, 5, 2]);
        assert_eq!(VariableBatchShardingContext::default().max_length(), 0);
    }

    #[test]
    fn test_from_redistributed_features() {
        let jt = JaggedFeatures::new(vec!["f".into()], vec![1, 2], vec![1, 0, 1])
            .unwrap()
            .with_stride_per_rank(vec![1, 2])
            .unwrap();
        let ctx = VariableBatchShardingContext::from_features(&SparseFeatures::id_list(jt)).unwrap();
        assert_eq!(ctx.batch_size_per_rank(), &[1, 2]);
    }

    #[test]
    fn test_from_local_features_fails() {
        let jt = JaggedFeatures::new(vec!["f".into()], vec![1], vec![1]).unwrap();
        assert!(VariableBatchShardingContext::from_features(&SparseFeatures::id_list(jt)).is_err());
        assert!(VariableBatchShardingContext::from_features(&SparseFeatures::default()).is_err());
    }
}
