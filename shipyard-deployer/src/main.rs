//! Shipyard Deployer
//!
//! Continuous-deployment daemon for a single containerized service.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Backend: Registry, cluster and metrics collaborators (HTTP or in-memory)
//! - Gate: Serializes every write to the service
//! - Watcher: Turns registry pushes into run triggers
//! - Controller: Runs Source, Build and Deploy for each trigger
//! - Scaler: Target-tracking autoscaler on a fixed interval
//! - API: Status endpoints and the registry push webhook
//!
//! Controller, watcher, autoscaler and API server run as independent tasks.
//! On shutdown the API stops first, then a deploy in progress is rolled back
//! and the autoscaler finishes its current write before the process exits.

mod api;
mod backend;
mod config;
mod controller;
mod deploy;
mod gate;
mod scaler;
mod watcher;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;
use crate::backend::Backend;
use crate::config::Config;
use crate::controller::{ControllerSettings, PipelineController, RunHistory, RunQueue};
use crate::deploy::{DeployOrchestrator, DeploySettings};
use crate::gate::ServiceGate;
use crate::scaler::Autoscaler;
use crate::watcher::RegistryWatcher;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shipyard_deployer=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Shipyard Deployer");

    // Load configuration
    let config = load_config()?;
    info!(
        "Loaded configuration: service={}, watching {}:{}, container={}",
        config.service_id, config.repository, config.image_tag, config.container_name
    );

    let backend = Backend::from_config(&config)?;
    let gate = Arc::new(ServiceGate::new(
        config.service_id.clone(),
        Arc::clone(&backend.cluster),
    ));

    // The control plane may not be up yet in container environments
    wait_for_service(&gate).await?;

    let queue = Arc::new(RunQueue::new());
    let history = Arc::new(RunHistory::default());

    let controller = Arc::new(PipelineController::new(
        ControllerSettings::from(&config),
        Arc::clone(&backend.registry),
        Arc::clone(&gate),
        DeployOrchestrator::new(DeploySettings::from(&config)),
        Arc::clone(&queue),
        history,
    ));
    let watcher = Arc::new(RegistryWatcher::new(
        config.repository.clone(),
        config.image_tag.clone(),
        Arc::clone(&queue),
    ));
    let autoscaler = Arc::new(Autoscaler::from_config(
        &config,
        Arc::clone(&gate),
        Arc::clone(&backend.metrics),
    ));

    info!("Services initialized");

    let shutdown = CancellationToken::new();

    let controller_task = tokio::spawn(Arc::clone(&controller).run());
    let autoscaler_task = tokio::spawn(autoscaler.run(shutdown.clone()));
    let watcher_task = {
        let watcher = Arc::clone(&watcher);
        let registry = Arc::clone(&backend.registry);
        tokio::spawn(async move {
            if let Err(e) = watcher.run(registry).await {
                error!("Registry watcher stopped: {}", e);
            }
        })
    };

    let app = api::create_router(AppState {
        controller: Arc::clone(&controller),
        watcher,
        gate,
        simulated_registry: backend.simulated_registry.clone(),
    });

    info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Failed to start server");

    // No new triggers arrive once the watcher is gone
    watcher_task.abort();
    controller.shutdown();
    shutdown.cancel();

    if let Err(e) = controller_task.await {
        error!("Pipeline controller task failed: {}", e);
    }
    if let Err(e) = autoscaler_task.await {
        error!("Autoscaler task failed: {}", e);
    }

    served?;
    info!("Shipyard Deployer stopped");
    Ok(())
}

/// Loads and validates configuration from environment variables
fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Invalid configuration in environment")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Waits until the managed service answers, with exponential backoff
async fn wait_for_service(gate: &ServiceGate) -> Result<()> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match gate.service_state().await {
            Ok(state) => {
                info!(
                    "Service {} reachable: desired={}, running={}",
                    gate.service_id(),
                    state.desired_count,
                    state.running_count
                );
                return Ok(());
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!(
                        "Service {} unreachable after {} attempts",
                        gate.service_id(),
                        MAX_RETRIES
                    );
                    return Err(anyhow::anyhow!(
                        "Failed to read state of service {}: {}",
                        gate.service_id(),
                        e
                    ));
                }

                warn!(
                    "Service {} not reachable (attempt {}/{}): {}",
                    gate.service_id(),
                    attempt,
                    MAX_RETRIES,
                    e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                // Exponential backoff with cap
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
