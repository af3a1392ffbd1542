//! In-process collaborators
//!
//! A simulated registry, cluster and metrics source. The deployer runs
//! against them with `SHIPYARD_BACKEND=memory` for dry runs, and the test
//! suites script them to provoke health check failures, slow rollouts and
//! missing metrics.

use async_trait::async_trait;
use shipyard_core::collaborator::{
    CollaboratorResult, ContainerOrchestrator, MetricsSource, Registry,
};
use shipyard_core::domain::descriptor::{self, DeploymentDescriptor};
use shipyard_core::domain::image::ImageReference;
use shipyard_core::domain::service::{
    HealthStatus, Instance, InstanceStatus, ServiceState, TaskRevision, Utilization,
};
use shipyard_core::error::CollaboratorError;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Registry
// =============================================================================

/// Registry holding a set of pullable images
#[derive(Default)]
pub struct MemoryRegistry {
    images: Mutex<HashSet<ImageReference>>,
    subscribers: Mutex<Vec<mpsc::Sender<ImageReference>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the image and notifies every watcher
    #[cfg(test)]
    pub fn push(&self, image: ImageReference) {
        lock(&self.images).insert(image.clone());

        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| !tx.is_closed());
        for tx in subscribers.iter() {
            if tx.try_send(image.clone()).is_err() {
                debug!("Watcher queue full, dropping push notification for {}", image);
            }
        }
    }

    /// Makes an image pullable without announcing a push
    pub fn seed(&self, image: ImageReference) {
        lock(&self.images).insert(image);
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn watch(
        &self,
        _repository: &str,
        _tag: &str,
    ) -> CollaboratorResult<mpsc::Receiver<ImageReference>> {
        let (tx, rx) = mpsc::channel(64);
        lock(&self.subscribers).push(tx);
        Ok(rx)
    }

    async fn image_exists(&self, image: &ImageReference) -> CollaboratorResult<bool> {
        Ok(lock(&self.images).contains(image))
    }
}

// =============================================================================
// Cluster
// =============================================================================

struct ServiceRecord {
    desired_count: u32,
    revisions: Vec<TaskRevision>,
    current: u64,
    utilization: Utilization,
}

struct InstanceRecord {
    service_id: String,
    instance: Instance,
    images: Vec<String>,
    health_polls: u32,
}

#[derive(Default)]
struct ClusterState {
    services: HashMap<String, ServiceRecord>,
    instances: HashMap<String, InstanceRecord>,
    failing_images: HashSet<String>,
    pending_polls: u32,
    metrics_down: bool,
    rejecting_revisions: bool,
    /// Lowest count of healthy running instances seen after any stop
    #[cfg(test)]
    min_running_seen: HashMap<String, u32>,
}

impl ClusterState {
    fn service(&mut self, service_id: &str) -> CollaboratorResult<&mut ServiceRecord> {
        self.services
            .get_mut(service_id)
            .ok_or_else(|| CollaboratorError::NotFound(format!("service {}", service_id)))
    }

    fn running(&self, service_id: &str) -> impl Iterator<Item = &InstanceRecord> {
        self.instances
            .values()
            .filter(move |r| r.service_id == service_id && r.instance.is_running())
    }

    fn is_healthy(&self, record: &InstanceRecord) -> bool {
        !record.images.iter().any(|i| self.failing_images.contains(i))
    }

    fn launch(&mut self, service_id: &str, revision: u64) -> CollaboratorResult<Instance> {
        let images: Vec<String> = self
            .service(service_id)?
            .revisions
            .iter()
            .find(|r| r.number == revision)
            .map(|r| r.descriptor.entries.iter().map(|e| e.image_uri.clone()).collect())
            .ok_or_else(|| CollaboratorError::NotFound(format!("revision {}", revision)))?;

        let instance = Instance {
            id: format!("task-{}", Uuid::new_v4().simple()),
            revision,
            status: InstanceStatus::Running,
        };

        self.instances.insert(
            instance.id.clone(),
            InstanceRecord {
                service_id: service_id.to_string(),
                instance: instance.clone(),
                images,
                health_polls: 0,
            },
        );

        Ok(instance)
    }
}

/// Simulated container cluster and metrics source
///
/// Instances become healthy after `pending_polls` health polls unless one
/// of their images was marked failing.
#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a single-container service at revision 1 with running instances
    pub fn add_service(&self, service_id: &str, container_name: &str, image_uri: &str, desired: u32) {
        let mut state = lock(&self.state);

        let descriptor = descriptor::build(container_name, image_uri).unwrap_or(
            DeploymentDescriptor {
                entries: Vec::new(),
            },
        );

        state.services.insert(
            service_id.to_string(),
            ServiceRecord {
                desired_count: desired,
                revisions: vec![TaskRevision {
                    number: 1,
                    descriptor,
                }],
                current: 1,
                utilization: Utilization {
                    cpu_percent: 0.0,
                    mem_percent: 0.0,
                },
            },
        );

        for _ in 0..desired {
            // The service was inserted above, launch cannot miss it.
            let _ = state.launch(service_id, 1);
        }
    }
}

/// Scripting hooks for the test suites
#[cfg(test)]
impl MemoryCluster {
    /// Instances of revisions containing `image_uri` fail their health checks
    pub fn fail_image(&self, image_uri: &str) {
        lock(&self.state).failing_images.insert(image_uri.to_string());
    }

    /// Health polls that answer `Pending` before a verdict
    pub fn set_pending_polls(&self, polls: u32) {
        lock(&self.state).pending_polls = polls;
    }

    /// Utilization the metrics source reports for a service
    pub fn set_utilization(&self, service_id: &str, cpu_percent: f64, mem_percent: f64) {
        if let Some(service) = lock(&self.state).services.get_mut(service_id) {
            service.utilization = Utilization {
                cpu_percent,
                mem_percent,
            };
        }
    }

    /// Makes every metrics read fail
    pub fn set_metrics_down(&self, down: bool) {
        lock(&self.state).metrics_down = down;
    }

    /// Makes the control plane refuse new task revisions
    pub fn set_rejecting_revisions(&self, rejecting: bool) {
        lock(&self.state).rejecting_revisions = rejecting;
    }

    /// Image URIs of the running instances, sorted
    pub fn running_images(&self, service_id: &str) -> Vec<String> {
        let state = lock(&self.state);
        let mut images: Vec<String> = state
            .running(service_id)
            .flat_map(|r| r.images.iter().cloned())
            .collect();
        images.sort();
        images
    }

    /// Image URI the current revision assigns to a container
    pub fn current_image(&self, service_id: &str, container_name: &str) -> Option<String> {
        let state = lock(&self.state);
        let service = state.services.get(service_id)?;
        service
            .revisions
            .iter()
            .find(|r| r.number == service.current)
            .and_then(|r| r.descriptor.image_for(container_name))
            .map(str::to_string)
    }

    /// Lowest healthy running count seen after a stop, if anything was stopped
    pub fn min_running_seen(&self, service_id: &str) -> Option<u32> {
        lock(&self.state).min_running_seen.get(service_id).copied()
    }
}

#[async_trait]
impl ContainerOrchestrator for MemoryCluster {
    async fn get_service_state(&self, service_id: &str) -> CollaboratorResult<ServiceState> {
        let mut state = lock(&self.state);
        let running_count = state.running(service_id).count() as u32;
        let service = state.service(service_id)?;

        Ok(ServiceState {
            desired_count: service.desired_count,
            running_count,
            cpu_utilization: service.utilization.cpu_percent,
            mem_utilization: service.utilization.mem_percent,
        })
    }

    async fn set_desired_count(&self, service_id: &str, count: u32) -> CollaboratorResult<()> {
        let mut state = lock(&self.state);
        let current = state.service(service_id)?.current;
        let running: Vec<String> = state
            .running(service_id)
            .map(|r| r.instance.id.clone())
            .collect();

        state.service(service_id)?.desired_count = count;

        // Converge running instances onto the new count
        let running_len = running.len() as u32;
        if running_len < count {
            for _ in running_len..count {
                state.launch(service_id, current)?;
            }
        } else {
            for id in running.iter().take((running_len - count) as usize) {
                state.instances.remove(id);
            }
        }

        Ok(())
    }

    async fn update_service_task_definition(
        &self,
        service_id: &str,
        descriptor: &DeploymentDescriptor,
    ) -> CollaboratorResult<TaskRevision> {
        let mut state = lock(&self.state);
        if state.rejecting_revisions {
            return Err(CollaboratorError::Api {
                status: 400,
                message: "task definition rejected".to_string(),
            });
        }

        let service = state.service(service_id)?;
        let number = service.revisions.iter().map(|r| r.number).max().unwrap_or(0) + 1;
        let revision = TaskRevision {
            number,
            descriptor: descriptor.clone(),
        };
        service.revisions.push(revision.clone());

        Ok(revision)
    }

    async fn current_revision(&self, service_id: &str) -> CollaboratorResult<TaskRevision> {
        let mut state = lock(&self.state);
        let service = state.service(service_id)?;
        let current = service.current;

        service
            .revisions
            .iter()
            .find(|r| r.number == current)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("revision {}", current)))
    }

    async fn activate_revision(&self, service_id: &str, revision: u64) -> CollaboratorResult<()> {
        let mut state = lock(&self.state);
        let service = state.service(service_id)?;

        if !service.revisions.iter().any(|r| r.number == revision) {
            return Err(CollaboratorError::NotFound(format!("revision {}", revision)));
        }
        service.current = revision;

        Ok(())
    }

    async fn list_instances(&self, service_id: &str) -> CollaboratorResult<Vec<Instance>> {
        let mut state = lock(&self.state);
        state.service(service_id)?;

        Ok(state
            .instances
            .values()
            .filter(|r| r.service_id == service_id)
            .map(|r| r.instance.clone())
            .collect())
    }

    async fn start_instance(
        &self,
        service_id: &str,
        revision: u64,
    ) -> CollaboratorResult<Instance> {
        lock(&self.state).launch(service_id, revision)
    }

    async fn instance_health(&self, instance_id: &str) -> CollaboratorResult<HealthStatus> {
        let mut state = lock(&self.state);
        let pending_polls = state.pending_polls;

        let record = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| CollaboratorError::NotFound(format!("instance {}", instance_id)))?;
        record.health_polls += 1;

        if !record.instance.is_running() {
            return Ok(HealthStatus::Unhealthy);
        }
        if record.health_polls <= pending_polls {
            return Ok(HealthStatus::Pending);
        }

        let record = &state.instances[instance_id];
        Ok(if state.is_healthy(record) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        })
    }

    async fn stop_instance(&self, instance_id: &str) -> CollaboratorResult<()> {
        let mut state = lock(&self.state);

        // Stopped instances are forgotten, like tasks the control plane reaps
        let record = state
            .instances
            .remove(instance_id)
            .ok_or_else(|| CollaboratorError::NotFound(format!("instance {}", instance_id)))?;
        debug!("Stopped instance {} of {}", instance_id, record.service_id);

        #[cfg(test)]
        {
            let healthy = state
                .running(&record.service_id)
                .filter(|r| state.is_healthy(r))
                .count() as u32;
            let seen = state
                .min_running_seen
                .entry(record.service_id)
                .or_insert(healthy);
            *seen = (*seen).min(healthy);
        }

        Ok(())
    }
}

#[async_trait]
impl MetricsSource for MemoryCluster {
    async fn get_utilization(&self, service_id: &str) -> CollaboratorResult<Utilization> {
        let mut state = lock(&self.state);
        if state.metrics_down {
            return Err(CollaboratorError::Api {
                status: 503,
                message: "metrics unavailable".to_string(),
            });
        }

        Ok(state.service(service_id)?.utilization)
    }
}
