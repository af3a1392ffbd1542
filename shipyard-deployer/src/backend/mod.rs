//! Collaborator wiring
//!
//! Builds the registry, cluster and metrics implementations selected by the
//! configuration.

pub mod memory;

use anyhow::Context;
use shipyard_client::{HttpCluster, HttpMetrics, HttpRegistry};
use shipyard_core::collaborator::{ContainerOrchestrator, MetricsSource, Registry};
use shipyard_core::domain::image::ImageReference;
use std::sync::Arc;
use tracing::info;

use crate::config::{BackendKind, Config};
use memory::{MemoryCluster, MemoryRegistry};

/// The three collaborators the deployer talks to
#[derive(Clone)]
pub struct Backend {
    pub registry: Arc<dyn Registry>,
    pub cluster: Arc<dyn ContainerOrchestrator>,
    pub metrics: Arc<dyn MetricsSource>,
    /// Set for the memory backend, where webhook pushes must also land in
    /// the simulated registry
    pub simulated_registry: Option<Arc<MemoryRegistry>>,
}

impl Backend {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        match config.backend {
            BackendKind::Memory => Ok(Self::memory(config)),
            BackendKind::Http => Self::http(config),
        }
    }

    fn http(config: &Config) -> anyhow::Result<Self> {
        info!(
            "Using HTTP backend: registry={}, cluster={}, metrics={} (request timeout {:?})",
            config.registry_url, config.cluster_url, config.metrics_url, config.request_timeout
        );

        let registry = HttpRegistry::new(
            config.registry_url.clone(),
            config.registry_poll_interval,
            config.request_timeout,
        )
        .context("Failed to build registry client")?;
        let cluster = HttpCluster::new(config.cluster_url.clone(), config.request_timeout)
            .context("Failed to build cluster client")?;
        let metrics = HttpMetrics::new(config.metrics_url.clone(), config.request_timeout)
            .context("Failed to build metrics client")?;

        Ok(Self {
            registry: Arc::new(registry),
            cluster: Arc::new(cluster),
            metrics: Arc::new(metrics),
            simulated_registry: None,
        })
    }

    /// Simulated service running the watched image at minimum capacity
    fn memory(config: &Config) -> Self {
        let image = ImageReference::new(config.repository.clone(), config.image_tag.clone());
        let image_uri = image.image_uri(config.registry_host());

        info!(
            "Using in-memory backend: service {} running {} x{}",
            config.service_id, image_uri, config.scaling.min_capacity
        );

        let registry = Arc::new(MemoryRegistry::new());
        registry.seed(image);

        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_service(
            &config.service_id,
            &config.container_name,
            &image_uri,
            config.scaling.min_capacity,
        );

        Self {
            registry: registry.clone(),
            cluster: cluster.clone(),
            metrics: cluster,
            simulated_registry: Some(registry),
        }
    }
}
