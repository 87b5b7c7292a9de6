//! embshard CLI - Inspect and simulate row-wise sharded embedding groups.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use embshard_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("embshard=info".parse()?))
        .init();

    let command = Cli::parse().command;
    let name = match &command {
        Commands::Plan(_) => "plan",
        Commands::Simulate(_) => "simulate",
    };

    match command {
        Commands::Plan(cmd) => cmd.run().await?,
        Commands::Simulate(cmd) => cmd.run().await?,
    }

    info!(command = name, "done");
    Ok(())
}
