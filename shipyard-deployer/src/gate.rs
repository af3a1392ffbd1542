//! Service gate
//!
//! The deploy orchestrator and the autoscaler both write to the same service
//! (task revisions, instances and `desired_count`). Every mutating call goes
//! through a [`ServiceGuard`], and only one guard per service exists at a time.
//!
//! The underlying tokio mutex is fair, so waiters are served in FIFO order: a
//! second deploy queues behind the first, and an autoscaler write requested
//! during a deploy waits for it to finish.

use shipyard_core::collaborator::{CollaboratorResult, ContainerOrchestrator};
use shipyard_core::domain::descriptor::DeploymentDescriptor;
use shipyard_core::domain::service::{HealthStatus, Instance, ServiceState, TaskRevision};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Why the gate is being acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePurpose {
    Deploy,
    Scale,
}

/// Serializes writes to a single service
pub struct ServiceGate {
    service_id: String,
    cluster: Arc<dyn ContainerOrchestrator>,
    lock: Mutex<()>,
    deploying: AtomicBool,
    queued_deploys: AtomicUsize,
}

impl ServiceGate {
    pub fn new(service_id: impl Into<String>, cluster: Arc<dyn ContainerOrchestrator>) -> Self {
        Self {
            service_id: service_id.into(),
            cluster,
            lock: Mutex::new(()),
            deploying: AtomicBool::new(false),
            queued_deploys: AtomicUsize::new(0),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// True while a deploy holds the gate
    pub fn is_deploying(&self) -> bool {
        self.deploying.load(Ordering::SeqCst)
    }

    /// Deploys waiting for the gate
    pub fn queued_deploys(&self) -> usize {
        self.queued_deploys.load(Ordering::SeqCst)
    }

    /// Waits for exclusive write access to the service
    pub async fn acquire(&self, purpose: GatePurpose) -> ServiceGuard<'_> {
        if purpose == GatePurpose::Deploy {
            self.queued_deploys.fetch_add(1, Ordering::SeqCst);
        }

        let permit = self.lock.lock().await;

        if purpose == GatePurpose::Deploy {
            self.queued_deploys.fetch_sub(1, Ordering::SeqCst);
            self.deploying.store(true, Ordering::SeqCst);
        }

        debug!("Gate for {} acquired for {:?}", self.service_id, purpose);

        ServiceGuard {
            gate: self,
            purpose,
            _permit: permit,
        }
    }

    // Reads do not need the guard

    pub async fn service_state(&self) -> CollaboratorResult<ServiceState> {
        self.cluster.get_service_state(&self.service_id).await
    }

    pub async fn current_revision(&self) -> CollaboratorResult<TaskRevision> {
        self.cluster.current_revision(&self.service_id).await
    }

    pub async fn instances(&self) -> CollaboratorResult<Vec<Instance>> {
        self.cluster.list_instances(&self.service_id).await
    }

    pub async fn instance_health(&self, instance_id: &str) -> CollaboratorResult<HealthStatus> {
        self.cluster.instance_health(instance_id).await
    }
}

/// Exclusive write access to a service
///
/// Dropping the guard releases the gate.
pub struct ServiceGuard<'a> {
    gate: &'a ServiceGate,
    purpose: GatePurpose,
    _permit: MutexGuard<'a, ()>,
}

impl ServiceGuard<'_> {
    pub async fn set_desired_count(&mut self, count: u32) -> CollaboratorResult<()> {
        self.gate
            .cluster
            .set_desired_count(&self.gate.service_id, count)
            .await
    }

    pub async fn register_revision(
        &mut self,
        descriptor: &DeploymentDescriptor,
    ) -> CollaboratorResult<TaskRevision> {
        self.gate
            .cluster
            .update_service_task_definition(&self.gate.service_id, descriptor)
            .await
    }

    pub async fn activate_revision(&mut self, revision: u64) -> CollaboratorResult<()> {
        self.gate
            .cluster
            .activate_revision(&self.gate.service_id, revision)
            .await
    }

    pub async fn start_instance(&mut self, revision: u64) -> CollaboratorResult<Instance> {
        self.gate
            .cluster
            .start_instance(&self.gate.service_id, revision)
            .await
    }

    pub async fn stop_instance(&mut self, instance_id: &str) -> CollaboratorResult<()> {
        self.gate.cluster.stop_instance(instance_id).await
    }
}

impl Drop for ServiceGuard<'_> {
    fn drop(&mut self) {
        if self.purpose == GatePurpose::Deploy {
            self.gate.deploying.store(false, Ordering::SeqCst);
        }
        debug!("Gate for {} released", self.gate.service_id);
    }
}
