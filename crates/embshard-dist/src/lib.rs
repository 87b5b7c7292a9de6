//! Row-wise sharded embedding lookups across workers of different batch sizes.
//!
//! This crate drives one step of a row-wise sharded embedding module:
//!
//! - **Bucketization**: every sparse id is mapped to the rank owning its row
//! - **Input dist**: a two-round all-to-all moves bucketized ids to their owners
//! - **Lookup**: each rank pools the rows it owns
//! - **Output dist**: pooled partials are padded, reduce-scattered and narrowed
//!   back to each rank's own batch
//!
//! # Architecture
//!
//! ```text
//!  SparseFeatures (local batch B_r)
//!          │ bucketize_features            (local)
//!          ▼
//!  SparseFeaturesAllToAll  ── round 1: headers ──┐
//!          │ Awaitable<Awaitable<..>>            │ all_to_all
//!          ▼                                     │
//!  shard-local SparseFeatures  ◄─ round 2: data ─┘
//!          │ EmbeddingLookup               (local)
//!          ▼
//!  [sum(B), D] pooled  ── pack_segments ──► [W * max(B), D]
//!          │ reduce_scatter
//!          ▼
//!  [max(B), D] ── narrow ──► [B_r, D]
//! ```
//!
//! Collectives are issued without blocking and completed through
//! [`Awaitable`], so a caller can overlap local work with communication.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use embshard_core::{Feature, JaggedFeatures, ShardingConfig, SparseFeatures};
//! use embshard_dist::{LocalGroup, ShardedEmbeddingPipeline, VariableBatchRwPooledEmbeddingSharding};
//!
//! # futures::executor::block_on(async {
//! let config = ShardingConfig::new(1, 4).with_id_list_feature(Feature::new("user", 100));
//! let transport = LocalGroup::new(1).unwrap().remove(0);
//! let sharding = VariableBatchRwPooledEmbeddingSharding::new(config, Arc::new(transport)).unwrap();
//! let mut pipeline = ShardedEmbeddingPipeline::new(&sharding).unwrap();
//!
//! let batch = JaggedFeatures::new(vec!["user".into()], vec![3, 42, 7], vec![2, 1]).unwrap();
//! let pooled = pipeline.forward(SparseFeatures::id_list(batch)).await.unwrap();
//! assert_eq!(pooled.rows(), 2);
//! # });
//! ```

pub mod awaitable;
pub mod bucketize;
pub mod context;
pub mod input_dist;
pub mod local;
pub mod lookup;
pub mod output_dist;
pub mod pipeline;
pub mod sharding;
pub mod sparse_dist;
pub mod transport;

pub use awaitable::Awaitable;
pub use bucketize::{bucketize_features, unbucketize, BucketizedFeatures};
pub use context::VariableBatchShardingContext;
pub use input_dist::{SparseFeaturesDist, VariableBatchRwSparseFeaturesDist};
pub use local::{LocalGroup, LocalTransport};
pub use lookup::{EmbeddingLookup, FeatureKind, GroupedPooledEmbeddingsLookup};
pub use output_dist::{PooledEmbeddingDist, VariableBatchRwPooledEmbeddingDist};
pub use pipeline::ShardedEmbeddingPipeline;
pub use sharding::{EmbeddingSharding, VariableBatchRwPooledEmbeddingSharding};
pub use sparse_dist::SparseFeaturesAllToAll;
pub use transport::{Payload, SharedTransport, Transport};
