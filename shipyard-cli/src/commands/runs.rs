//! Run command handlers
//!
//! Lists run history, shows a single run and aborts the in-flight run.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use shipyard_client::DeployerClient;
use shipyard_core::domain::pipeline::{PipelineRun, RunState, RunStatus};
use shipyard_core::dto::run::RunSummary;

use crate::config::Config;

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// List recent runs, newest first
    List,
    /// Get run details
    Get {
        /// Run id
        id: u64,

        /// Print the raw JSON document
        #[arg(long)]
        json: bool,
    },
    /// Abort the run in progress
    Abort,
}

/// Handle run commands
pub async fn handle_run_command(command: RunCommands, config: &Config) -> Result<()> {
    let client = DeployerClient::new(&config.deployer_url)?;

    match command {
        RunCommands::List => list_runs(&client).await,
        RunCommands::Get { id, json } => get_run(&client, id, json).await,
        RunCommands::Abort => abort_run(&client).await,
    }
}

async fn list_runs(client: &DeployerClient) -> Result<()> {
    let runs = client.list_runs().await?;

    if runs.is_empty() {
        println!("{}", "No runs yet.".yellow());
    } else {
        println!("{}", format!("Found {} run(s):", runs.len()).bold());
        println!();
        for run in runs {
            print_run_summary(&run);
        }
    }

    Ok(())
}

async fn get_run(client: &DeployerClient, id: u64, json: bool) -> Result<()> {
    let run = client.get_run(id).await?;

    if json {
        let text = serde_json::to_string_pretty(&run).context("Failed to render run")?;
        println!("{}", text);
    } else {
        print_run_details(&run);
    }

    Ok(())
}

async fn abort_run(client: &DeployerClient) -> Result<()> {
    let response = client.abort_run().await?;

    println!(
        "{}",
        format!("✓ Abort requested for run {}", response.run_id)
            .green()
            .bold()
    );
    println!(
        "{}",
        "  The run stops at the next stage boundary (deploys roll back first)".dimmed()
    );

    Ok(())
}

/// Print a run summary
fn print_run_summary(run: &RunSummary) {
    println!("  {} Run {}", "▸".cyan(), run.id.to_string().bold());
    println!("    Image:    {}", run.image);
    println!(
        "    Status:   {} ({:?})",
        colorize_status(&run.status),
        run.state
    );
    println!(
        "    Started:  {}",
        run.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    if let Some(failure) = &run.failure {
        println!(
            "    Failed:   {} {}",
            format!("[{}]", failure.stage).red(),
            failure.reason
        );
    }
    println!();
}

/// Print full run details
fn print_run_details(run: &PipelineRun) {
    println!("{}", format!("Run {}", run.id).bold());
    println!("  Image:       {}", run.trigger.image.to_string().cyan());
    println!("  Trigger:     {}", run.trigger.id.to_string().dimmed());
    println!("  Status:      {}", colorize_status(&run.status));
    println!("  Stage:       {}", run.stage);
    println!("  Transitions: {}", transitions(&run.transitions));
    println!(
        "  Created:     {}",
        run.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(finished) = run.finished_at {
        println!("  Finished:    {}", finished.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(failure) = &run.failure {
        println!();
        println!("  {} {}", "Failure:".red().bold(), failure.reason);
        println!("  {}   {}", "Stage:".red(), failure.stage);
    }

    if !run.artifacts.is_empty() {
        println!();
        println!("  {}", "Artifacts:".bold());
        for artifact in &run.artifacts {
            println!("    - {}: {}", artifact.name.cyan(), artifact.content.dimmed());
        }
    }
}

fn transitions(states: &[RunState]) -> String {
    states
        .iter()
        .map(|s| format!("{:?}", s))
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Colorize run status for display
fn colorize_status(status: &RunStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        RunStatus::Pending => status_str.dimmed(),
        RunStatus::Running => status_str.yellow(),
        RunStatus::Succeeded => status_str.green(),
        RunStatus::Failed => status_str.red(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_rendering() {
        let states = [RunState::Idle, RunState::Sourcing, RunState::Failed];
        assert_eq!(transitions(&states), "Idle → Sourcing → Failed");
    }
}
