//! External collaborators
//!
//! The deployer reaches the outside world only through these traits. The HTTP
//! implementations live in `shipyard-client`; an in-process simulation lives in
//! the deployer's memory backend.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::descriptor::DeploymentDescriptor;
use crate::domain::image::ImageReference;
use crate::domain::service::{HealthStatus, Instance, ServiceState, TaskRevision, Utilization};
use crate::error::CollaboratorError;

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Container registry
#[async_trait]
pub trait Registry: Send + Sync {
    /// Stream of pushes to `repository`
    ///
    /// Implementations may deliver pushes for other tags or repositories; the
    /// watcher filters them.
    async fn watch(
        &self,
        repository: &str,
        tag: &str,
    ) -> CollaboratorResult<mpsc::Receiver<ImageReference>>;

    /// Whether the image can currently be pulled
    async fn image_exists(&self, image: &ImageReference) -> CollaboratorResult<bool>;
}

/// Container orchestration control plane
///
/// The only mutation surface for a running service. Mutating calls must be
/// made through the deployer's service gate.
#[async_trait]
pub trait ContainerOrchestrator: Send + Sync {
    async fn get_service_state(&self, service_id: &str) -> CollaboratorResult<ServiceState>;

    async fn set_desired_count(&self, service_id: &str, count: u32) -> CollaboratorResult<()>;

    /// Registers the next task revision with the descriptor's images swapped in
    ///
    /// The new revision does not receive instances until they are started
    /// explicitly.
    async fn update_service_task_definition(
        &self,
        service_id: &str,
        descriptor: &DeploymentDescriptor,
    ) -> CollaboratorResult<TaskRevision>;

    /// Revision the service currently launches instances from
    async fn current_revision(&self, service_id: &str) -> CollaboratorResult<TaskRevision>;

    /// Makes `revision` the service's current revision
    async fn activate_revision(&self, service_id: &str, revision: u64) -> CollaboratorResult<()>;

    async fn list_instances(&self, service_id: &str) -> CollaboratorResult<Vec<Instance>>;

    async fn start_instance(&self, service_id: &str, revision: u64)
    -> CollaboratorResult<Instance>;

    async fn instance_health(&self, instance_id: &str) -> CollaboratorResult<HealthStatus>;

    async fn stop_instance(&self, instance_id: &str) -> CollaboratorResult<()>;
}

/// Utilization metrics
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn get_utilization(&self, service_id: &str) -> CollaboratorResult<Utilization>;
}
