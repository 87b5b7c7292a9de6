//! Row-wise bucketization of jagged sparse features.
//!
//! Every id of feature `f` is assigned to exactly one shard through the
//! feature's block size (see [`BlockSizeTable::bucket`]) and rewritten as the
//! shard-local id. The output groups ids by destination shard so that the
//! slice bound for rank `w` is contiguous, ready to be handed to an
//! all-to-all.

use embshard_core::{BlockSizeTable, JaggedFeatures, Result, ShardingError};

/// Sparse features regrouped by destination shard.
///
/// Lengths are laid out `[shard][feature][example]`. Ids and weights follow
/// the same order, with ids of one `(shard, feature, example)` cell kept in
/// their original relative order.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketizedFeatures {
    keys: Vec<String>,
    num_buckets: usize,
    batch_size: usize,
    lengths: Vec<u32>,
    ids: Vec<i64>,
    weights: Option<Vec<f32>>,
    bucket_offsets: Vec<usize>,
}

impl BucketizedFeatures {
    /// Returns the feature keys.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Returns the number of buckets (the world size).
    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    /// Returns the number of examples of the original batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns the number of features.
    pub fn num_features(&self) -> usize {
        self.keys.len()
    }

    /// Returns all lengths, `[shard][feature][example]`.
    pub fn lengths(&self) -> &[u32] {
        &self.lengths
    }

    /// Returns all shard-local ids, grouped by shard.
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Returns all weights, if any.
    pub fn weights(&self) -> Option<&[f32]> {
        self.weights.as_deref()
    }

    /// Returns the `[feature][example]` lengths bound for shard `w`.
    pub fn bucket_lengths(&self, w: usize) -> &[u32] {
        let cell = self.num_features() * self.batch_size;
        &self.lengths[w * cell..(w + 1) * cell]
    }

    /// Returns the ids bound for shard `w`.
    pub fn bucket_ids(&self, w: usize) -> &[i64] {
        &self.ids[self.bucket_offsets[w]..self.bucket_offsets[w + 1]]
    }

    /// Returns the weights bound for shard `w`, if any.
    pub fn bucket_weights(&self, w: usize) -> Option<&[f32]> {
        let (start, end) = (self.bucket_offsets[w], self.bucket_offsets[w + 1]);
        self.weights.as_ref().map(|weights| &weights[start..end])
    }

    /// Returns how many ids of every feature are bound for shard `w`.
    pub fn feature_bucket_counts(&self, w: usize) -> Vec<usize> {
        let lengths = self.bucket_lengths(w);
        (0..self.num_features())
            .map(|f| {
                lengths[f * self.batch_size..(f + 1) * self.batch_size]
                    .iter()
                    .map(|&l| l as usize)
                    .sum()
            })
            .collect()
    }
}

/// Splits `features` into one bucket per shard.
///
/// With `bucketize_pos`, the weights of the output are replaced by each id's
/// position within its original example. With `output_permute`, the returned
/// permutation maps every original id position to its bucketized position:
/// `bucketized[perm[i]]` is the value that was at position `i`.
///
/// # Errors
///
/// Returns [`ShardingError::OutOfRange`] when the number of features differs
/// from the number of block sizes, and [`ShardingError::InvalidInput`] for a
/// negative id.
///
/// # Examples
///
/// ```
/// use embshard_core::{BlockSizeTable, Device, JaggedFeatures};
/// use embshard_dist::bucketize_features;
///
/// let table = BlockSizeTable::new(&[10], 2, Device::Cpu);
/// let jt = JaggedFeatures::new(vec!["f0".into()], vec![2, 7, 4, 9], vec![2, 2]).unwrap();
/// let (buckets, _) = bucketize_features(&jt, &table, false, false).unwrap();
/// assert_eq!(buckets.bucket_ids(0), &[2, 4]);
/// assert_eq!(buckets.bucket_ids(1), &[2, 4]);
/// ```
pub fn bucketize_features(
    features: &JaggedFeatures,
    block_sizes: &BlockSizeTable,
    bucketize_pos: bool,
    output_permute: bool,
) -> Result<(BucketizedFeatures, Option<Vec<usize>>)> {
    let num_features = features.num_features();
    if num_features != block_sizes.len() {
        return Err(ShardingError::out_of_range(format!(
            "{num_features} features supplied, {} configured",
            block_sizes.len()
        )));
    }
    let world_size = block_sizes.world_size();
    let batch_size = features.stride();
    let cell = num_features * batch_size;

    // Pass 1: assign buckets and count ids per (shard, feature, example).
    let mut assignments = Vec::with_capacity(features.num_ids());
    let mut lengths = vec![0u32; world_size * cell];
    let mut cursor = 0usize;
    for (segment, &len) in features.lengths().iter().enumerate() {
        let f = segment / batch_size;
        for &id in &features.ids()[cursor..cursor + len as usize] {
            if id < 0 {
                return Err(ShardingError::invalid_input(format!(
                    "negative id {id} in feature '{}'",
                    features.keys()[f]
                )));
            }
            let (shard, local) = block_sizes.bucket(f, id as u64);
            lengths[shard * cell + segment] += 1;
            assignments.push((shard, local as i64));
        }
        cursor += len as usize;
    }

    let mut offsets = Vec::with_capacity(lengths.len() + 1);
    let mut acc = 0usize;
    for &len in &lengths {
        offsets.push(acc);
        acc += len as usize;
    }
    let bucket_offsets: Vec<usize> = (0..=world_size)
        .map(|w| offsets.get(w * cell).copied().unwrap_or(acc))
        .collect();

    // Pass 2: scatter ids into their (shard, feature, example) cells.
    let mut ids = vec![0i64; acc];
    let carry_weights = bucketize_pos || features.weights().is_some();
    let mut weights = if carry_weights { vec![0f32; acc] } else { Vec::new() };
    let mut permutation = if output_permute {
        Vec::with_capacity(acc)
    } else {
        Vec::new()
    };
    let mut next = offsets;
    let mut i = 0usize;
    for (segment, &len) in features.lengths().iter().enumerate() {
        for position in 0..len as usize {
            let (shard, local) = assignments[i];
            let slot = &mut next[shard * cell + segment];
            let dst = *slot;
            *slot += 1;

            ids[dst] = local;
            if bucketize_pos {
                weights[dst] = position as f32;
            } else if let Some(w) = features.weights() {
                weights[dst] = w[i];
            }
            if output_permute {
                permutation.push(dst);
            }
            i += 1;
        }
    }

    let bucketized = BucketizedFeatures {
        keys: features.keys().to_vec(),
        num_buckets: world_size,
        batch_size,
        lengths,
        ids,
        weights: carry_weights.then_some(weights),
        bucket_offsets,
    };
    Ok((bucketized, output_permute.then_some(permutation)))
}

/// Restores the original order of values produced in bucketized order.
pub fn unbucketize<T: Clone>(bucketized: &[T], permutation: &[usize]) -> Vec<T> {
    permutation.iter().map(|&p| bucketized[p].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use embshard_core::Device;

    fn single_feature(ids: Vec<i64>, lengths: Vec<u32>) -> JaggedFeatures {
        JaggedFeatures::new(vec!["f0".into()], ids, lengths).unwrap()
    }

    #[test]
    fn test_two_shard_assignment() {
        let table = BlockSizeTable::new(&[10], 2, Device::Cpu);
        let jt = single_feature(vec![2, 7, 4, 9], vec![2, 2]);
        let (b, perm) = bucketize_features(&jt, &table, false, false).unwrap();

        assert!(perm.is_none());
        assert_eq!(b.lengths(), &[1, 1, 1, 1]);
        assert_eq!(b.bucket_ids(0), &[2, 4]);
        assert_eq!(b.bucket_ids(1), &[2, 4]);
        assert_eq!(b.feature_bucket_counts(0), vec![2]);
        assert!(b.weights().is_none());
    }

    #[test]
    fn test_single_shard_is_identity() {
        let table = BlockSizeTable::new(&[100, 50], 1, Device::Cpu);
        let jt = JaggedFeatures::new(
            vec!["a".into(), "b".into()],
            vec![5, 99, 0, 7, 49],
            vec![2, 1, 1, 1],
        )
        .unwrap();
        let (b, perm) = bucketize_features(&jt, &table, false, true).unwrap();

        assert_eq!(b.ids(), jt.ids());
        assert_eq!(b.lengths(), jt.lengths());
        assert_eq!(perm.unwrap(), (0..5).collect::<Vec<_>>());
    }

    #[test]
    fn test_counts_are_conserved_per_feature() {
        let table = BlockSizeTable::new(&[12, 7], 3, Device::Cpu);
        let jt = JaggedFeatures::new(
            vec!["a".into(), "b".into()],
            vec![0, 11, 5, 8, 3, 6, 1, 2, 4],
            vec![3, 1, 0, 2, 2, 1],
        )
        .unwrap();
        let (b, _) = bucketize_features(&jt, &table, false, false).unwrap();

        for f in 0..2 {
            let before: usize = jt.feature_lengths(f).iter().map(|&l| l as usize).sum();
            let after: usize = (0..3).map(|w| b.feature_bucket_counts(w)[f]).sum();
            assert_eq!(before, after);
        }
        assert_eq!(b.ids().len(), jt.num_ids());
    }

    #[test]
    fn test_local_ids_stay_inside_block() {
        let table = BlockSizeTable::new(&[10], 3, Device::Cpu);
        let ids: Vec<i64> = (0..10).collect();
        let jt = single_feature(ids, vec![10]);
        let (b, _) = bucketize_features(&jt, &table, false, false).unwrap();
        for w in 0..3 {
            assert!(b.bucket_ids(w).iter().all(|&id| (0..4).contains(&id)));
        }
        assert_eq!(b.bucket_ids(2), &[0, 1]);
    }

    #[test]
    fn test_ids_beyond_hash_size_use_modulo_fallback() {
        let table = BlockSizeTable::new(&[4], 2, Device::Cpu);
        let jt = single_feature(vec![5, 4], vec![2]);
        let (b, _) = bucketize_features(&jt, &table, false, false).unwrap();
        assert_eq!(b.bucket_ids(0), &[2]);
        assert_eq!(b.bucket_ids(1), &[2]);
    }

    #[test]
    fn test_negative_id_rejected() {
        let table = BlockSizeTable::new(&[10], 2, Device::Cpu);
        let jt = single_feature(vec![1, -3], vec![2]);
        let err = bucketize_features(&jt, &table, false, false).unwrap_err();
        assert!(matches!(err, ShardingError::InvalidInput { .. }));
    }

    #[test]
    fn test_feature_count_mismatch_is_out_of_range() {
        let table = BlockSizeTable::new(&[10, 10], 2, Device::Cpu);
        let jt = single_feature(vec![1], vec![1]);
        let err = bucketize_features(&jt, &table, false, false).unwrap_err();
        assert!(matches!(err, ShardingError::OutOfRange { .. }));
    }

    #[test]
    fn test_deterministic() {
        let table = BlockSizeTable::new(&[20, 9], 4, Device::Cpu);
        let jt = JaggedFeatures::with_weights(
            vec!["a".into(), "b".into()],
            vec![19, 3, 8, 0, 7, 2, 8],
            vec![2, 2, 1, 2],
            vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7],
        )
        .unwrap();
        let first = bucketize_features(&jt, &table, true, true).unwrap();
        let second = bucketize_features(&jt, &table, true, true).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_positions_are_carried() {
        let table = BlockSizeTable::new(&[10], 2, Device::Cpu);
        let jt = single_feature(vec![9, 1, 6, 3], vec![3, 1]);
        let (b, _) = bucketize_features(&jt, &table, true, false).unwrap();

        // Shard 0 holds ids 1 (pos 1) and 3 (pos 0); shard 1 holds 9 (pos 0) and 6 (pos 2).
        assert_eq!(b.bucket_ids(0), &[1, 3]);
        assert_eq!(b.bucket_weights(0).unwrap(), &[1.0, 0.0]);
        assert_eq!(b.bucket_ids(1), &[4, 1]);
        assert_eq!(b.bucket_weights(1).unwrap(), &[0.0, 2.0]);
    }

    #[test]
    fn test_weights_follow_their_ids() {
        let table = BlockSizeTable::new(&[10], 2, Device::Cpu);
        let jt = JaggedFeatures::with_weights(
            vec!["s".into()],
            vec![8, 2],
            vec![2],
            vec![0.8, 0.2],
        )
        .unwrap();
        let (b, _) = bucketize_features(&jt, &table, false, false).unwrap();
        assert_eq!(b.bucket_weights(0).unwrap(), &[0.2]);
        assert_eq!(b.bucket_weights(1).unwrap(), &[0.8]);
    }

    #[test]
    fn test_permutation_restores_example_order() {
        let table = BlockSizeTable::new(&[30], 3, Device::Cpu);
        let ids = vec![25, 3, 14, 7, 29, 11, 0, 20, 18];
        let lengths = vec![3, 2, 4];
        // Tag every id with the example it came from.
        let markers: Vec<f32> = lengths
            .iter()
            .enumerate()
            .flat_map(|(b, &l)| std::iter::repeat(b as f32).take(l as usize))
            .collect();
        let jt = JaggedFeatures::with_weights(vec!["f".into()], ids.clone(), lengths, markers.clone())
            .unwrap();
        let (b, perm) = bucketize_features(&jt, &table, false, true).unwrap();
        let perm = perm.unwrap();

        assert_eq!(unbucketize(b.weights().unwrap(), &perm), markers);

        // Reconstruct global ids in bucketized order, then undo the permutation.
        let mut global = Vec::new();
        for w in 0..3 {
            global.extend(b.bucket_ids(w).iter().map(|&local| w as i64 * 10 + local));
        }
        assert_eq!(unbucketize(&global, &perm), ids);
    }

    #[test]
    fn test_empty_batch() {
        let table = BlockSizeTable::new(&[10], 2, Device::Cpu);
        let jt = JaggedFeatures::new(vec!["f0".into()], Vec::new(), Vec::new()).unwrap();
        let (b, perm) = bucketize_features(&jt, &table, false, true).unwrap();
        assert_eq!(b.batch_size(), 0);
        assert!(b.bucket_ids(1).is_empty());
        assert_eq!(b.feature_bucket_counts(0), vec![0]);
        assert!(perm.unwrap().is_empty());
    }
}
