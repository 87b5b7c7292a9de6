//! Error types for the embshard libraries.
//!
//! The variants mirror how a sharded embedding step can fail: bad
//! construction-time configuration, malformed local input (detected before any
//! collective is issued), a collective whose participants disagree, and a
//! transport that lost a peer. [`ShardingError::Stage`] wraps any of these with
//! the pipeline stage that produced it.

use std::fmt;

use embshard_tensor::TensorError;
use thiserror::Error;

/// A stage of the sharded embedding pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Local bucketization of sparse ids.
    Bucketize,
    /// The all-to-all redistribution of bucketized features.
    InputDist,
    /// The shard-local embedding lookup.
    Lookup,
    /// Packing plus reduce-scatter of pooled embeddings.
    OutputDist,
}

impl Stage {
    /// Returns the stage name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Bucketize => "bucketize",
            Stage::InputDist => "input_dist",
            Stage::Lookup => "lookup",
            Stage::OutputDist => "output_dist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The main error type for sharding operations.
#[derive(Debug, Error)]
pub enum ShardingError {
    /// Construction-time configuration is inconsistent.
    #[error("Configuration error: {message}")]
    Config {
        /// A description of the configuration error.
        message: String,
    },

    /// A feature kind is present or absent contrary to the configured counts.
    #[error("Out of range: {message}")]
    OutOfRange {
        /// A description of the inconsistency.
        message: String,
    },

    /// Local input violates a structural invariant.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// A description of the invalid input.
        message: String,
    },

    /// Participants of a collective disagree on its shape.
    #[error("Exchange failed in {op}: {message}")]
    Exchange {
        /// The collective operation that failed.
        op: &'static str,
        /// A description of the disagreement.
        message: String,
    },

    /// The transport could not complete a collective.
    #[error("Transport error in {op}: {message}")]
    Transport {
        /// The collective operation that failed.
        op: &'static str,
        /// A description of the failure.
        message: String,
    },

    /// The shard-local lookup failed.
    #[error("Lookup error: {message}")]
    Lookup {
        /// A description of the lookup failure.
        message: String,
    },

    /// A dense tensor operation failed.
    #[error("Tensor error: {0}")]
    Tensor(#[from] TensorError),

    /// An error tagged with the pipeline stage where it occurred.
    #[error("{stage} stage failed: {source}")]
    Stage {
        /// The stage that failed.
        stage: Stage,
        /// The underlying error.
        #[source]
        source: Box<ShardingError>,
    },
}

impl ShardingError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates an out-of-range error.
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::OutOfRange {
            message: message.into(),
        }
    }

    /// Creates an exchange (protocol consistency) error.
    pub fn exchange(op: &'static str, message: impl Into<String>) -> Self {
        Self::Exchange {
            op,
            message: message.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(op: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            op,
            message: message.into(),
        }
    }

    /// Wraps this error with the stage that produced it.
    ///
    /// Already-tagged errors keep their innermost stage.
    pub fn at_stage(self, stage: Stage) -> Self {
        match self {
            tagged @ ShardingError::Stage { .. } => tagged,
            other => ShardingError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Returns the stage this error was tagged with, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ShardingError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// A specialized Result type for sharding operations.
pub type Result<T> = std::result::Result<T, ShardingError>;
