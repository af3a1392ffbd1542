//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod descriptor;
mod push;
mod runs;
mod service;

pub use runs::RunCommands;
pub use service::ServiceCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Pipeline run history and control
    Runs {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Announce a registry push to the deployer
    Push {
        /// Repository the image was pushed to
        #[arg(long)]
        repository: String,

        /// Pushed tag
        #[arg(long, default_value = "latest")]
        tag: String,
    },
    /// Managed service
    Service {
        #[command(subcommand)]
        command: ServiceCommands,
    },
    /// Print the deployment descriptor for an image (no deployer needed)
    Descriptor {
        /// Container name in the service task template
        #[arg(long)]
        container: String,

        /// Full image URI
        #[arg(long)]
        image: String,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Runs { command } => runs::handle_run_command(command, config).await,
        Commands::Push { repository, tag } => push::push(config, repository, tag).await,
        Commands::Service { command } => service::handle_service_command(command, config).await,
        Commands::Descriptor { container, image } => descriptor::print_descriptor(&container, &image),
    }
}
