//! Errors raised by shard tables.

use thiserror::Error;

/// Why a shard table operation failed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HashTableError {
    /// An embedding buffer is not `rows * dim` long.
    #[error("buffer holds {actual} values, {expected} required")]
    BufferSize {
        /// Required length.
        expected: usize,
        /// Supplied length.
        actual: usize,
    },

    /// Pooling weights do not pair up with ids.
    #[error("{weights} weights supplied for {ids} ids")]
    WeightCount {
        /// Number of ids.
        ids: usize,
        /// Number of weights.
        weights: usize,
    },

    /// A local id falls outside the rows this shard owns.
    #[error("local id {id} outside the {capacity} rows this shard owns")]
    IdOutOfRange {
        /// The rejected local id.
        id: i64,
        /// Rows owned by the shard.
        capacity: usize,
    },

    /// A local id has no row yet.
    #[error("no row for local id {id}")]
    MissingRow {
        /// The local id.
        id: i64,
    },
}

/// Result alias for shard table operations.
pub type Result<T> = std::result::Result<T, HashTableError>;
