//! Shard-local embedding storage.
//!
//! Each worker owns one contiguous block of rows per feature. This crate
//! provides the storage for those rows:
//!
//! - [`EmbeddingHashTable`] - The core trait for local-id keyed rows
//! - [`ShardTable`] - A HashMap-backed implementation with lazy initialization
//! - [`initializer`] - Strategies for creating rows on first lookup
//!
//! # Example
//!
//! ```
//! use embshard_hash_table::{EmbeddingHashTable, ShardTable};
//!
//! let mut table = ShardTable::new(1024, 4);
//! table.initialize_missing(&[1, 2, 2]).unwrap();
//! assert_eq!(table.size(), 2);
//! assert!(table.initialize_missing(&[1024]).is_err());
//! ```

mod error;
pub mod initializer;
mod shard_table;
mod traits;

pub use error::{HashTableError, Result};
pub use initializer::{
    ConstantInitializer, Initializer, SeededUniformInitializer, ZerosInitializer,
};
pub use shard_table::ShardTable;
pub use traits::EmbeddingHashTable;
