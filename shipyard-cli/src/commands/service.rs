//! Service command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use shipyard_client::DeployerClient;
use shipyard_core::domain::service::ServiceState;

use crate::config::Config;

/// Service subcommands
#[derive(Subcommand)]
pub enum ServiceCommands {
    /// Show desired/running counts and utilization
    Status,
}

/// Handle service commands
pub async fn handle_service_command(command: ServiceCommands, config: &Config) -> Result<()> {
    let client = DeployerClient::new(&config.deployer_url)?;

    match command {
        ServiceCommands::Status => {
            let state = client.service_state().await?;
            print_service_state(&state);
            Ok(())
        }
    }
}

fn print_service_state(state: &ServiceState) {
    let running = if state.running_count == state.desired_count {
        state.running_count.to_string().green()
    } else {
        state.running_count.to_string().yellow()
    };

    println!("{}", "Service".bold());
    println!("  Desired: {}", state.desired_count.to_string().bold());
    println!("  Running: {}", running);
    println!("  CPU:     {:.1}%", state.cpu_utilization);
    println!("  Memory:  {:.1}%", state.mem_utilization);
}
