#![forbid(unsafe_code)]

//! **refharvest-cli** – binary entry point for the reference harvesting
//! orchestrator process.
//!
//! Parses the handful of process-level arguments, installs logging, then
//! hands off to [`refharvest_runtime::run`] for the actual collaborator
//! wiring and AMQP/HTTP serving loop.

use anyhow::Result;
use clap::Parser;

#[derive(Parser)]
#[command(name = "refharvest")]
#[command(about = "Reference harvesting orchestrator")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file (without extension), layered under
    /// `REFHARVEST__`-prefixed environment overrides.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    refharvest_runtime::init_logging();

    refharvest_runtime::run(cli.config.as_deref()).await
}
