//! Sparse feature abstractions.
//!
//! This module provides the data model consumed by the sharding pipeline:
//!
//! - [`Feature`]: static description of one sparse input column.
//! - [`JaggedFeatures`]: a batch of variable-length id lists for several
//!   features, stored as flat `ids`/`lengths`/`weights` buffers.
//! - [`SparseFeatures`]: the id-list and id-score-list kinds travelling together.
//!
//! # Layout
//!
//! Lengths are feature-major: `lengths[f * stride + b]` is the number of ids
//! example `b` holds for feature `f`. The ids of that example follow the ids of
//! every preceding `(feature, example)` pair in `ids`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShardingError};

/// A sparse input column.
///
/// # Examples
///
/// ```
/// use embshard_core::Feature;
///
/// let feature = Feature::new("user_id", 1_000);
/// assert_eq!(feature.hash_size(), 1_000);
/// assert_eq!(feature.name(), "user_id");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    /// The feature name (for lookup wiring and logging).
    name: String,

    /// Cardinality of the legal id space.
    hash_size: u64,

    /// Whether each id carries an auxiliary weight.
    #[serde(default)]
    weighted: bool,
}

impl Feature {
    /// Creates an unweighted feature.
    pub fn new(name: impl Into<String>, hash_size: u64) -> Self {
        Self {
            name: name.into(),
            hash_size,
            weighted: false,
        }
    }

    /// Creates a feature whose ids carry a per-id weight.
    pub fn weighted(name: impl Into<String>, hash_size: u64) -> Self {
        Self {
            name: name.into(),
            hash_size,
            weighted: true,
        }
    }

    /// Returns the feature name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the hash size.
    #[inline]
    pub fn hash_size(&self) -> u64 {
        self.hash_size
    }
}

/// Jagged id lists for a batch of examples over several features.
///
/// Invariant: `sum(lengths) == ids.len() == weights.len()` (when weights are
/// present) and `lengths.len()` is a multiple of the number of keys.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JaggedFeatures {
    keys: Vec<String>,
    ids: Vec<i64>,
    lengths: Vec<u32>,
    weights: Option<Vec<f32>>,
    stride_per_rank: Option<Vec<usize>>,
}

impl JaggedFeatures {
    /// Creates a batch of unweighted id lists.
    ///
    /// # Examples
    ///
    /// ```
    /// use embshard_core::JaggedFeatures;
    ///
    /// // Two examples of one feature: {2, 7} and {4, 9}.
    /// let jt = JaggedFeatures::new(vec!["f0".into()], vec![2, 7, 4, 9], vec![2, 2]).unwrap();
    /// assert_eq!(jt.stride(), 2);
    /// assert_eq!(jt.example_ids(0, 1), &[4, 9]);
    /// ```
    pub fn new(keys: Vec<String>, ids: Vec<i64>, lengths: Vec<u32>) -> Result<Self> {
        Self::build(keys, ids, lengths, None)
    }

    /// Creates a batch of id lists where every id carries a weight.
    pub fn with_weights(
        keys: Vec<String>,
        ids: Vec<i64>,
        lengths: Vec<u32>,
        weights: Vec<f32>,
    ) -> Result<Self> {
        Self::build(keys, ids, lengths, Some(weights))
    }

    fn build(
        keys: Vec<String>,
        ids: Vec<i64>,
        lengths: Vec<u32>,
        weights: Option<Vec<f32>>,
    ) -> Result<Self> {
        if keys.is_empty() && !lengths.is_empty() {
            return Err(ShardingError::invalid_input(
                "lengths supplied without any feature keys",
            ));
        }
        if !keys.is_empty() && lengths.len() % keys.len() != 0 {
            return Err(ShardingError::invalid_input(format!(
                "{} lengths cannot be split across {} features",
                lengths.len(),
                keys.len()
            )));
        }
        let total: u64 = lengths.iter().map(|&l| u64::from(l)).sum();
        if total != ids.len() as u64 {
            return Err(ShardingError::invalid_input(format!(
                "sum of lengths {total} does not match {} ids",
                ids.len()
            )));
        }
        if let Some(w) = &weights {
            if w.len() != ids.len() {
                return Err(ShardingError::invalid_input(format!(
                    "{} weights supplied for {} ids",
                    w.len(),
                    ids.len()
                )));
            }
        }
        Ok(Self {
            keys,
            ids,
            lengths,
            weights,
            stride_per_rank: None,
        })
    }

    /// Records how many examples each origin rank contributed to the stride.
    pub fn with_stride_per_rank(mut self, stride_per_rank: Vec<usize>) -> Result<Self> {
        let total: usize = stride_per_rank.iter().sum();
        if total != self.stride() {
            return Err(ShardingError::invalid_input(format!(
                "stride per rank sums to {total}, stride is {}",
                self.stride()
            )));
        }
        self.stride_per_rank = Some(stride_per_rank);
        Ok(self)
    }

    /// Returns the feature keys.
    #[inline]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Returns the flat ids.
    #[inline]
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Returns the flat feature-major lengths.
    #[inline]
    pub fn lengths(&self) -> &[u32] {
        &self.lengths
    }

    /// Returns the per-id weights, if present.
    #[inline]
    pub fn weights(&self) -> Option<&[f32]> {
        self.weights.as_deref()
    }

    /// Returns the per-origin-rank example counts, if this batch was redistributed.
    #[inline]
    pub fn stride_per_rank(&self) -> Option<&[usize]> {
        self.stride_per_rank.as_deref()
    }

    /// Returns the number of features.
    #[inline]
    pub fn num_features(&self) -> usize {
        self.keys.len()
    }

    /// Returns the number of examples per feature.
    pub fn stride(&self) -> usize {
        if self.keys.is_empty() {
            0
        } else {
            self.lengths.len() / self.keys.len()
        }
    }

    /// Returns the total number of ids.
    #[inline]
    pub fn num_ids(&self) -> usize {
        self.ids.len()
    }

    /// Returns the lengths of feature `f` across the batch.
    pub fn feature_lengths(&self, f: usize) -> &[u32] {
        let stride = self.stride();
        &self.lengths[f * stride..(f + 1) * stride]
    }

    /// Returns the start offset of every `(feature, example)` segment, plus the end.
    pub fn offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.lengths.len() + 1);
        let mut acc = 0usize;
        offsets.push(acc);
        for &len in &self.lengths {
            acc += len as usize;
            offsets.push(acc);
        }
        offsets
    }

    /// Returns the ids example `b` holds for feature `f`.
    pub fn example_ids(&self, f: usize, b: usize) -> &[i64] {
        let (start, end) = self.segment(f, b);
        &self.ids[start..end]
    }

    fn segment(&self, f: usize, b: usize) -> (usize, usize) {
        let idx = f * self.stride() + b;
        let start: usize = self.lengths[..idx].iter().map(|&l| l as usize).sum();
        (start, start + self.lengths[idx] as usize)
    }
}

/// The two kinds of sparse input travelling through one step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SparseFeatures {
    /// Unweighted id lists.
    pub id_list_features: Option<JaggedFeatures>,
    /// Id lists whose ids carry a score.
    pub id_score_list_features: Option<JaggedFeatures>,
}

impl SparseFeatures {
    /// Creates sparse features from both kinds.
    pub fn new(
        id_list_features: Option<JaggedFeatures>,
        id_score_list_features: Option<JaggedFeatures>,
    ) -> Self {
        Self {
            id_list_features,
            id_score_list_features,
        }
    }

    /// Sparse features with only id lists.
    pub fn id_list(features: JaggedFeatures) -> Self {
        Self::new(Some(features), None)
    }

    /// Returns the batch size shared by both kinds.
    ///
    /// Fails when both kinds are present with different strides.
    pub fn batch_size(&self) -> Result<usize> {
        match (&self.id_list_features, &self.id_score_list_features) {
            (Some(a), Some(b)) if a.stride() != b.stride() => {
                Err(ShardingError::invalid_input(format!(
                    "id list stride {} differs from id score list stride {}",
                    a.stride(),
                    b.stride()
                )))
            }
            (Some(a), _) => Ok(a.stride()),
            (None, Some(b)) => Ok(b.stride()),
            (None, None) => Ok(0),
        }
    }
}
