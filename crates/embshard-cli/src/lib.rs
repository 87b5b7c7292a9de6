//! embshard CLI Library
//!
//! This crate provides the command-line interface for row-wise embedding
//! sharding:
//!
//! - **Plan**: Show which rank owns which rows of every feature
//! - **Simulate**: Drive random variable-size batches through an in-process group
//!
//! # Example
//!
//! ```bash
//! # Show the placement of a configuration
//! embshard plan --config sharding.json
//!
//! # Run 20 steps with up to 16 examples per rank
//! embshard simulate --config sharding.json --steps 20 --max-batch-size 16
//! ```

pub mod commands;

use clap::{Parser, Subcommand};

pub use commands::{PlanCommand, SimulateCommand};

/// embshard - Row-wise sharded embedding lookups with variable batch sizes
#[derive(Parser, Debug)]
#[command(name = "embshard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print how every feature is split across ranks
    Plan(PlanCommand),

    /// Run every rank of a group in-process
    Simulate(SimulateCommand),
}

/// Result type alias for CLI operations
pub type CliResult<T> = anyhow::Result<T>;
