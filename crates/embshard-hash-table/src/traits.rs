//! Core trait for shard-local embedding tables.

use crate::error::{HashTableError, Result};

/// Storage for the embedding rows one shard owns, keyed by local id.
///
/// # Example
///
/// ```
/// use embshard_hash_table::{EmbeddingHashTable, ShardTable};
///
/// let mut table = ShardTable::new(1024, 2);
/// table.assign(&[1, 2], &[0.1, 0.2, 0.3, 0.4]).unwrap();
///
/// let mut output = vec![0.0; 2];
/// table.pooled_lookup(&[1, 2], None, &mut output).unwrap();
/// assert!((output[0] - 0.4).abs() < 1e-6);
/// ```
pub trait EmbeddingHashTable {
    /// Looks up embeddings for the given IDs into `embeddings`
    /// (length `ids.len() * dim()`).
    ///
    /// # Errors
    ///
    /// * [`HashTableError::MissingRow`] - If any ID is not in the table
    /// * [`HashTableError::BufferSize`] - If the output buffer size is incorrect
    fn lookup(&self, ids: &[i64], embeddings: &mut [f32]) -> Result<()>;

    /// Assigns embeddings to the given IDs, inserting new ones.
    ///
    /// # Errors
    ///
    /// * [`HashTableError::IdOutOfRange`] - If an ID is not a row this table can hold
    /// * [`HashTableError::BufferSize`] - If the embedding buffer size is incorrect
    fn assign(&mut self, ids: &[i64], embeddings: &[f32]) -> Result<()>;

    /// Returns the number of entries in the table.
    fn size(&self) -> usize;

    /// Returns the embedding dimension.
    fn dim(&self) -> usize;

    /// Checks if the table contains an entry for the given ID.
    fn contains(&self, id: i64) -> bool;

    /// Adds the sum of the embeddings of `ids` into `output` (length `dim()`),
    /// scaling each row by its weight when `weights` is given.
    fn pooled_lookup(&self, ids: &[i64], weights: Option<&[f32]>, output: &mut [f32]) -> Result<()> {
        let dim = self.dim();
        if output.len() != dim {
            return Err(HashTableError::BufferSize {
                expected: dim,
                actual: output.len(),
            });
        }
        if let Some(w) = weights {
            if w.len() != ids.len() {
                return Err(HashTableError::WeightCount {
                    ids: ids.len(),
                    weights: w.len(),
                });
            }
        }
        let mut rows = vec![0.0f32; ids.len() * dim];
        self.lookup(ids, &mut rows)?;
        for (i, row) in rows.chunks_exact(dim.max(1)).enumerate().take(ids.len()) {
            let scale = weights.map_or(1.0, |w| w[i]);
            for (o, v) in output.iter_mut().zip(row) {
                *o += scale * v;
            }
        }
        Ok(())
    }
}
