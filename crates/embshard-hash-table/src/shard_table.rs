//! HashMap-backed table holding the rows one shard owns.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::error::{HashTableError, Result};
use crate::initializer::{Initializer, ZerosInitializer};
use crate::traits::EmbeddingHashTable;

/// Embedding rows of one feature on one shard, keyed by local id.
///
/// Local ids are `0..capacity`; any other id is rejected before a row is
/// created, so the table never holds a row the shard does not own.
///
/// # Example
///
/// ```
/// use embshard_hash_table::{EmbeddingHashTable, ShardTable};
///
/// let mut table = ShardTable::new(8, 2);
/// table.assign(&[3], &[1.0, 2.0]).unwrap();
///
/// let mut out = vec![0.0; 2];
/// table.lookup(&[3], &mut out).unwrap();
/// assert_eq!(out, vec![1.0, 2.0]);
/// ```
pub struct ShardTable {
    entries: HashMap<i64, Vec<f32>>,
    capacity: usize,
    dim: usize,
    initializer: Arc<dyn Initializer>,
}

impl std::fmt::Debug for ShardTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardTable")
            .field("size", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("dim", &self.dim)
            .field("initializer", &self.initializer.name())
            .finish()
    }
}

impl ShardTable {
    /// Creates a zero-initialized table holding at most `capacity` rows.
    pub fn new(capacity: usize, dim: usize) -> Self {
        Self::with_initializer(capacity, dim, Arc::new(ZerosInitializer))
    }

    /// Creates a table with a custom initializer for missing rows.
    pub fn with_initializer(
        capacity: usize,
        dim: usize,
        initializer: Arc<dyn Initializer>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            dim,
            initializer,
        }
    }

    /// Returns the maximum number of rows.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn check_range(&self, ids: &[i64]) -> Result<()> {
        match ids
            .iter()
            .find(|&&id| id < 0 || id as u64 >= self.capacity as u64)
        {
            Some(&id) => Err(HashTableError::IdOutOfRange {
                id,
                capacity: self.capacity,
            }),
            None => Ok(()),
        }
    }

    /// Creates rows for any of `ids` that are missing.
    ///
    /// # Errors
    ///
    /// Returns [`HashTableError::IdOutOfRange`] if any id is outside
    /// `0..capacity`; in that case no row is created.
    pub fn initialize_missing(&mut self, ids: &[i64]) -> Result<usize> {
        self.check_range(ids)?;
        let mut missing: Vec<i64> = ids
            .iter()
            .copied()
            .filter(|id| !self.entries.contains_key(id))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        for &id in &missing {
            let row = self.initializer.initialize(id, self.dim);
            self.entries.insert(id, row);
        }
        Ok(missing.len())
    }

    fn validate_buffer_size(&self, ids_len: usize, buffer_len: usize) -> Result<()> {
        let expected = ids_len * self.dim;
        if buffer_len != expected {
            return Err(HashTableError::BufferSize {
                expected,
                actual: buffer_len,
            });
        }
        Ok(())
    }
}

impl EmbeddingHashTable for ShardTable {
    fn lookup(&self, ids: &[i64], embeddings: &mut [f32]) -> Result<()> {
        self.validate_buffer_size(ids.len(), embeddings.len())?;
        for (i, &id) in ids.iter().enumerate() {
            let row = self
                .entries
                .get(&id)
                .ok_or(HashTableError::MissingRow { id })?;
            embeddings[i * self.dim..(i + 1) * self.dim].copy_from_slice(row);
        }
        Ok(())
    }

    fn assign(&mut self, ids: &[i64], embeddings: &[f32]) -> Result<()> {
        self.validate_buffer_size(ids.len(), embeddings.len())?;
        self.check_range(ids)?;
        for (i, &id) in ids.iter().enumerate() {
            let row = &embeddings[i * self.dim..(i + 1) * self.dim];
            match self.entries.get_mut(&id) {
                Some(existing) => existing.copy_from_slice(row),
                None => {
                    self.entries.insert(id, row.to_vec());
                }
            }
        }
        Ok(())
    }

    fn size(&self) -> usize {
        self.entries.len()
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn contains(&self, id: i64) -> bool {
        self.entries.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initializer::ConstantInitializer;

    #[test]
    fn test_assign_and_lookup() {
        let mut table = ShardTable::new(4, 2);
        table.assign(&[0, 1], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(table.size(), 2);
        assert!(table.contains(1));
        assert!(!table.contains(2));

        let mut out = vec![0.0; 4];
        table.lookup(&[1, 0], &mut out).unwrap();
        assert_eq!(out, vec![3.0, 4.0, 1.0, 2.0]);
    }

    #[test]
    fn test_lookup_missing_id() {
        let table = ShardTable::new(4, 2);
        let mut out = vec![0.0; 2];
        assert!(matches!(
            table.lookup(&[9], &mut out),
            Err(HashTableError::MissingRow { id: 9 })
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut table = ShardTable::new(4, 2);
        assert!(matches!(
            table.assign(&[0], &[1.0]),
            Err(HashTableError::BufferSize {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_assign_outside_owned_rows() {
        let mut table = ShardTable::new(1, 1);
        table.assign(&[0], &[1.0]).unwrap();
        assert_eq!(
            table.assign(&[1], &[1.0]),
            Err(HashTableError::IdOutOfRange { id: 1, capacity: 1 })
        );
        assert_eq!(
            table.assign(&[-1], &[1.0]),
            Err(HashTableError::IdOutOfRange { id: -1, capacity: 1 })
        );
        // Overwrite of an existing row still fits.
        table.assign(&[0], &[2.0]).unwrap();
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn test_initialize_missing_uses_initializer() {
        let mut table = ShardTable::with_initializer(4, 2, Arc::new(ConstantInitializer::new(0.5)));
        assert_eq!(table.initialize_missing(&[3, 3]).unwrap(), 1);
        let mut out = vec![0.0; 2];
        table.lookup(&[3], &mut out).unwrap();
        assert_eq!(out, vec![0.5; 2]);
        assert!(format!("{table:?}").contains("constant"));
    }

    #[test]
    fn test_out_of_range_id_never_takes_a_row() {
        let mut table = ShardTable::new(4, 1);
        assert_eq!(
            table.initialize_missing(&[1, 4]),
            Err(HashTableError::IdOutOfRange { id: 4, capacity: 4 })
        );
        assert_eq!(table.size(), 0);
        assert_eq!(table.initialize_missing(&[0, 1, 2, 3]).unwrap(), 4);
        assert_eq!(table.size(), table.capacity());
    }

    #[test]
    fn test_pooled_lookup_with_weights() {
        let mut table = ShardTable::new(4, 2);
        table.assign(&[0, 1], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut out = vec![0.0; 2];
        table
            .pooled_lookup(&[0, 1], Some(&[2.0, 0.5]), &mut out)
            .unwrap();
        assert_eq!(out, vec![3.5, 6.0]);

        let mut bad = vec![0.0; 2];
        assert!(matches!(
            table.pooled_lookup(&[0, 1], Some(&[1.0]), &mut bad),
            Err(HashTableError::WeightCount { .. })
        ));
    }
}
