//! Shipyard CLI
//!
//! Command-line interface for inspecting and driving the Shipyard deployer.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(about = "Shipyard continuous deployment CLI", long_about = None)]
struct Cli {
    /// Deployer URL
    #[arg(
        long,
        env = "SHIPYARD_DEPLOYER_URL",
        default_value = "http://localhost:8080"
    )]
    deployer_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        deployer_url: cli.deployer_url,
    };

    handle_command(cli.command, &config).await
}
