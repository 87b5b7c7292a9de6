//! Core types for row-wise embedding sharding.
//!
//! This crate provides the foundational types shared by every embshard crate:
//!
//! - **Feature model**: [`Feature`], [`JaggedFeatures`] and [`SparseFeatures`].
//! - **Block sizes**: the per-feature row-wise split of the id space.
//! - **Group identity**: [`RankInfo`], passed explicitly instead of read from
//!   process-global state.
//! - **Configuration**: the JSON-loadable [`ShardingConfig`].
//! - **Error types**: [`ShardingError`] and the pipeline [`Stage`] it names.
//!
//! # Example
//!
//! ```
//! use embshard_core::{BlockSizeTable, Device, Feature, ShardingConfig};
//!
//! let config = ShardingConfig::new(2, 4).with_id_list_feature(Feature::new("user", 10));
//! config.validate().unwrap();
//!
//! let table: BlockSizeTable = config.id_list_block_sizes();
//! assert_eq!(table.as_slice(), &[5]);
//! assert_eq!(table.bucket(0, 7), (1, 2));
//! ```

pub mod block_size;
pub mod config;
pub mod device;
pub mod error;
pub mod feature;
pub mod group;

pub use block_size::{block_size_for, bucket_for_id, BlockSizeTable};
pub use config::ShardingConfig;
pub use device::{Device, Placed};
pub use error::{Result, ShardingError, Stage};
pub use feature::{Feature, JaggedFeatures, SparseFeatures};
pub use group::RankInfo;
