//! CLI Command Implementations
//!
//! - [`plan`]: Print the row-wise placement of a configuration
//! - [`simulate`]: Run a whole group in-process

pub mod plan;
pub mod simulate;

pub use plan::{PlanCommand, ShardingPlan};
pub use simulate::{RankSummary, SimulateCommand};
