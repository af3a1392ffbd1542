//! Deploy orchestrator
//!
//! Rolls a deployment descriptor onto a running service:
//! - registers the next task revision with the new images and makes it current
//! - replaces old instances incrementally, never letting healthy capacity
//!   fall below the minimum healthy percentage
//! - trips a circuit breaker when too many new instances fail their health
//!   checks, rolling back to the previous revision
//!
//! A deploy never writes `desired_count`; only the revision changes.

mod health;
pub mod rolling;

use serde::Serialize;
use shipyard_core::domain::descriptor::DeploymentDescriptor;
use shipyard_core::domain::service::HealthStatus;
use shipyard_core::error::DeployError;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::gate::{GatePurpose, ServiceGate, ServiceGuard};
use health::await_health;
use rolling::CapacityBounds;

/// Failure reason reported when the circuit breaker rolls a deploy back
pub const CIRCUIT_BREAKER_REASON: &str = "circuit-breaker rollback";

/// Rolling update and circuit breaker tuning
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub minimum_healthy_percent: u32,
    pub maximum_percent: u32,
    pub rollback_threshold: u32,
    pub health_check_timeout: Duration,
    pub health_check_interval: Duration,
}

impl From<&Config> for DeploySettings {
    fn from(config: &Config) -> Self {
        Self {
            minimum_healthy_percent: config.minimum_healthy_percent,
            maximum_percent: config.maximum_percent,
            rollback_threshold: config.rollback_threshold,
            health_check_timeout: config.health_check_timeout,
            health_check_interval: config.health_check_interval,
        }
    }
}

/// Outcome of a deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DeployResult {
    Succeeded {
        revision: u64,
    },
    Failed {
        reason: String,
        /// Revision restored by a rollback, if swapping had begun
        rolled_back_to: Option<u64>,
    },
}

/// Bookkeeping for one rollout
struct Rollout {
    previous: u64,
    next: u64,
    desired: u32,
    /// Running instances of older revisions, oldest first
    old: Vec<String>,
    /// New instances that passed their health checks
    healthy: Vec<String>,
    /// New instances awaiting a verdict
    starting: Vec<String>,
    failures: u32,
}

/// Applies descriptors to services
pub struct DeployOrchestrator {
    settings: DeploySettings,
}

impl DeployOrchestrator {
    pub fn new(settings: DeploySettings) -> Self {
        Self { settings }
    }

    /// Rolls `descriptor` onto the gate's service
    ///
    /// Waits behind any deploy already holding the gate. `cancel` and
    /// `deadline` are honored between swap steps, each followed by a
    /// rollback.
    pub async fn deploy(
        &self,
        descriptor: &DeploymentDescriptor,
        gate: &ServiceGate,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> DeployResult {
        if gate.is_deploying() {
            info!(
                "Deploy to {} queued behind an in-progress deploy",
                gate.service_id()
            );
        }

        let mut guard = gate.acquire(GatePurpose::Deploy).await;

        let mut rollout = match self.prepare(descriptor, gate, &mut guard, cancel).await {
            Ok(rollout) => rollout,
            Err(e) => {
                error!("Deploy to {} failed before swapping: {}", gate.service_id(), e);
                return DeployResult::Failed {
                    reason: e.to_string(),
                    rolled_back_to: None,
                };
            }
        };

        info!(
            "Rolling {} from revision {} to {} ({} instance(s))",
            gate.service_id(),
            rollout.previous,
            rollout.next,
            rollout.desired
        );

        match self.roll(gate, &mut guard, &mut rollout, cancel, deadline).await {
            Ok(()) => {
                info!(
                    "Service {} now runs revision {}",
                    gate.service_id(),
                    rollout.next
                );
                DeployResult::Succeeded {
                    revision: rollout.next,
                }
            }
            Err(e) => {
                let reason = match &e {
                    DeployError::HealthCheckFailed { .. } => CIRCUIT_BREAKER_REASON.to_string(),
                    other => other.to_string(),
                };
                warn!(
                    "Deploy of revision {} to {} failed: {}",
                    rollout.next,
                    gate.service_id(),
                    e
                );

                self.rollback(gate, &mut guard, &rollout).await;

                DeployResult::Failed {
                    reason,
                    rolled_back_to: Some(rollout.previous),
                }
            }
        }
    }

    /// Validates the descriptor, registers and activates the next revision
    async fn prepare(
        &self,
        descriptor: &DeploymentDescriptor,
        gate: &ServiceGate,
        guard: &mut ServiceGuard<'_>,
        cancel: &CancellationToken,
    ) -> Result<Rollout, DeployError> {
        let state = gate.service_state().await?;
        let previous = gate.current_revision().await?;

        for name in descriptor.container_names() {
            if !previous.defines_container(name) {
                return Err(DeployError::UnknownContainer(name.to_string()));
            }
        }

        if cancel.is_cancelled() {
            return Err(DeployError::Aborted);
        }

        let next = guard.register_revision(descriptor).await?;

        let old = gate
            .instances()
            .await?
            .into_iter()
            .filter(|i| i.is_running() && i.revision != next.number)
            .map(|i| i.id)
            .collect();

        guard.activate_revision(next.number).await?;

        Ok(Rollout {
            previous: previous.number,
            next: next.number,
            desired: state.desired_count,
            old,
            healthy: Vec::new(),
            starting: Vec::new(),
            failures: 0,
        })
    }

    async fn roll(
        &self,
        gate: &ServiceGate,
        guard: &mut ServiceGuard<'_>,
        rollout: &mut Rollout,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<(), DeployError> {
        let bounds = CapacityBounds::new(
            rollout.desired,
            self.settings.minimum_healthy_percent,
            self.settings.maximum_percent,
        );

        while (rollout.healthy.len() as u32) < rollout.desired {
            if cancel.is_cancelled() {
                return Err(DeployError::Aborted);
            }
            if Instant::now() >= deadline {
                return Err(DeployError::Timeout);
            }

            let running = (rollout.old.len() + rollout.healthy.len()) as u32;
            let remaining = rollout.desired - rollout.healthy.len() as u32;
            let batch = bounds.headroom(running).min(remaining);

            if batch == 0 {
                let stoppable = bounds
                    .surplus(running)
                    .min(rollout.old.len() as u32)
                    .min(remaining);
                if stoppable == 0 {
                    return Err(DeployError::InvalidCapacity(format!(
                        "{} running, floor {}, ceiling {}",
                        running, bounds.min_healthy, bounds.max_running
                    )));
                }
                Self::retire(guard, rollout, stoppable).await?;
                continue;
            }

            let mut batch_ids = Vec::with_capacity(batch as usize);
            for _ in 0..batch {
                let instance = guard.start_instance(rollout.next).await?;
                rollout.starting.push(instance.id.clone());
                batch_ids.push(instance.id);
            }

            let results = await_health(
                gate,
                &batch_ids,
                self.settings.health_check_timeout,
                self.settings.health_check_interval,
            )
            .await;

            for (id, status) in results {
                rollout.starting.retain(|s| *s != id);

                if status == HealthStatus::Healthy {
                    rollout.healthy.push(id);
                    continue;
                }

                rollout.failures += 1;
                warn!(
                    "Instance {} of revision {} failed health checks ({}/{})",
                    id, rollout.next, rollout.failures, self.settings.rollback_threshold
                );
                if let Err(e) = guard.stop_instance(&id).await {
                    error!("Failed to stop unhealthy instance {}: {}", id, e);
                }
            }

            if rollout.failures >= self.settings.rollback_threshold {
                return Err(DeployError::HealthCheckFailed {
                    failures: rollout.failures,
                });
            }
            if cancel.is_cancelled() {
                return Err(DeployError::Aborted);
            }

            let excess = (rollout.old.len() + rollout.healthy.len()) as u32;
            let excess = excess.saturating_sub(rollout.desired);
            Self::retire(guard, rollout, excess.min(rollout.old.len() as u32)).await?;
        }

        // Leftovers when the service ran more old instances than desired
        let leftover = rollout.old.len() as u32;
        Self::retire(guard, rollout, leftover).await?;

        // Last point a cancellation can still undo the rollout
        if cancel.is_cancelled() {
            return Err(DeployError::Aborted);
        }
        Ok(())
    }

    /// Stops the `count` oldest instances of the previous revisions
    async fn retire(
        guard: &mut ServiceGuard<'_>,
        rollout: &mut Rollout,
        count: u32,
    ) -> Result<(), DeployError> {
        for _ in 0..count {
            let Some(id) = rollout.old.first().cloned() else {
                break;
            };
            guard.stop_instance(&id).await?;
            rollout.old.remove(0);
        }
        Ok(())
    }

    /// Restores the previous revision at full capacity, then removes the new one
    async fn rollback(&self, gate: &ServiceGate, guard: &mut ServiceGuard<'_>, rollout: &Rollout) {
        warn!(
            "Rolling {} back to revision {}",
            gate.service_id(),
            rollout.previous
        );

        if let Err(e) = guard.activate_revision(rollout.previous).await {
            error!(
                "Failed to reactivate revision {} on {}: {}",
                rollout.previous,
                gate.service_id(),
                e
            );
        }

        let missing = rollout.desired.saturating_sub(rollout.old.len() as u32);
        let mut restored = Vec::new();
        for _ in 0..missing {
            match guard.start_instance(rollout.previous).await {
                Ok(instance) => restored.push(instance.id),
                Err(e) => error!("Failed to restore an instance of {}: {}", rollout.previous, e),
            }
        }

        if !restored.is_empty() {
            let results = await_health(
                gate,
                &restored,
                self.settings.health_check_timeout,
                self.settings.health_check_interval,
            )
            .await;
            for (id, status) in results {
                if status != HealthStatus::Healthy {
                    error!(
                        "Restored instance {} of revision {} is {}",
                        id, rollout.previous, status
                    );
                }
            }
        }

        for id in rollout.healthy.iter().chain(rollout.starting.iter()) {
            if let Err(e) = guard.stop_instance(id).await {
                error!("Failed to stop instance {} of revision {}: {}", id, rollout.next, e);
            }
        }

        info!(
            "Service {} rolled back to revision {}",
            gate.service_id(),
            rollout.previous
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryCluster;
    use shipyard_core::collaborator::ContainerOrchestrator;
    use shipyard_core::domain::descriptor;
    use std::sync::Arc;

    fn settings() -> DeploySettings {
        DeploySettings {
            minimum_healthy_percent: 100,
            maximum_percent: 200,
            rollback_threshold: 2,
            health_check_timeout: Duration::from_secs(2),
            health_check_interval: Duration::from_millis(5),
        }
    }

    fn service(desired: u32) -> (Arc<MemoryCluster>, Arc<ServiceGate>) {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_service("svc", "web", "myrepo:v1", desired);
        let gate = Arc::new(ServiceGate::new("svc", cluster.clone()));
        (cluster, gate)
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn test_successful_deploy_preserves_desired_count() {
        let (cluster, gate) = service(3);
        let orchestrator = DeployOrchestrator::new(settings());
        let descriptor = descriptor::build("web", "myrepo:v2").unwrap();

        let result = orchestrator
            .deploy(&descriptor, &gate, &CancellationToken::new(), far_deadline())
            .await;

        assert_eq!(result, DeployResult::Succeeded { revision: 2 });
        let state = cluster.get_service_state("svc").await.unwrap();
        assert_eq!(state.desired_count, 3);
        assert_eq!(state.running_count, 3);
        assert_eq!(cluster.running_images("svc"), vec!["myrepo:v2"; 3]);
        assert_eq!(cluster.current_image("svc", "web").as_deref(), Some("myrepo:v2"));
        assert!(cluster.min_running_seen("svc").unwrap() >= 3);
    }

    #[tokio::test]
    async fn test_one_at_a_time_stays_above_floor() {
        let (cluster, gate) = service(4);
        let orchestrator = DeployOrchestrator::new(DeploySettings {
            minimum_healthy_percent: 50,
            maximum_percent: 125,
            ..settings()
        });
        let descriptor = descriptor::build("web", "myrepo:v2").unwrap();

        let result = orchestrator
            .deploy(&descriptor, &gate, &CancellationToken::new(), far_deadline())
            .await;

        assert_eq!(result, DeployResult::Succeeded { revision: 2 });
        assert_eq!(cluster.running_images("svc"), vec!["myrepo:v2"; 4]);
        assert!(cluster.min_running_seen("svc").unwrap() >= 2);
        assert_eq!(cluster.get_service_state("svc").await.unwrap().desired_count, 4);
    }

    #[tokio::test]
    async fn test_circuit_breaker_rolls_back() {
        let (cluster, gate) = service(1);
        cluster.fail_image("myrepo:broken");
        let orchestrator = DeployOrchestrator::new(settings());
        let descriptor = descriptor::build("web", "myrepo:broken").unwrap();

        let result = orchestrator
            .deploy(&descriptor, &gate, &CancellationToken::new(), far_deadline())
            .await;

        assert_eq!(
            result,
            DeployResult::Failed {
                reason: CIRCUIT_BREAKER_REASON.to_string(),
                rolled_back_to: Some(1),
            }
        );
        assert_eq!(cluster.running_images("svc"), vec!["myrepo:v1"]);
        assert_eq!(cluster.current_image("svc", "web").as_deref(), Some("myrepo:v1"));
        assert_eq!(cluster.get_service_state("svc").await.unwrap().desired_count, 1);
        assert!(cluster.min_running_seen("svc").unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_unknown_container_fails_without_swapping() {
        let (cluster, gate) = service(2);
        let orchestrator = DeployOrchestrator::new(settings());
        let descriptor = descriptor::build("worker", "myrepo:v2").unwrap();

        let result = orchestrator
            .deploy(&descriptor, &gate, &CancellationToken::new(), far_deadline())
            .await;

        assert!(matches!(
            result,
            DeployResult::Failed { rolled_back_to: None, ref reason } if reason.contains("worker")
        ));
        assert_eq!(cluster.running_images("svc"), vec!["myrepo:v1"; 2]);
    }

    #[tokio::test]
    async fn test_rejected_revision_fails_without_swapping() {
        let (cluster, gate) = service(2);
        cluster.set_rejecting_revisions(true);
        let orchestrator = DeployOrchestrator::new(settings());
        let descriptor = descriptor::build("web", "myrepo:v2").unwrap();

        let result = orchestrator
            .deploy(&descriptor, &gate, &CancellationToken::new(), far_deadline())
            .await;

        assert!(matches!(
            result,
            DeployResult::Failed { rolled_back_to: None, ref reason } if reason.contains("rejected")
        ));
        assert_eq!(cluster.current_image("svc", "web").as_deref(), Some("myrepo:v1"));
    }

    #[tokio::test]
    async fn test_expired_deadline_rolls_back() {
        let (cluster, gate) = service(2);
        let orchestrator = DeployOrchestrator::new(settings());
        let descriptor = descriptor::build("web", "myrepo:v2").unwrap();

        let result = orchestrator
            .deploy(&descriptor, &gate, &CancellationToken::new(), Instant::now())
            .await;

        assert_eq!(
            result,
            DeployResult::Failed {
                reason: "deploy timed out".to_string(),
                rolled_back_to: Some(1),
            }
        );
        assert_eq!(cluster.current_image("svc", "web").as_deref(), Some("myrepo:v1"));
        assert_eq!(cluster.running_images("svc"), vec!["myrepo:v1"; 2]);
    }

    fn spawn_deploy(
        orchestrator: &Arc<DeployOrchestrator>,
        gate: &Arc<ServiceGate>,
        image_uri: &'static str,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<DeployResult> {
        let orchestrator = Arc::clone(orchestrator);
        let gate = Arc::clone(gate);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let descriptor = descriptor::build("web", image_uri).unwrap();
            orchestrator
                .deploy(&descriptor, &gate, &cancel, far_deadline())
                .await
        })
    }

    #[tokio::test]
    async fn test_abort_is_honored_after_current_step() {
        let (cluster, gate) = service(2);
        cluster.set_pending_polls(3);
        let orchestrator = Arc::new(DeployOrchestrator::new(DeploySettings {
            maximum_percent: 150,
            health_check_interval: Duration::from_millis(10),
            ..settings()
        }));
        let cancel = CancellationToken::new();

        let handle = spawn_deploy(&orchestrator, &gate, "myrepo:v2", &cancel);

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let result = handle.await.unwrap();
        assert_eq!(
            result,
            DeployResult::Failed {
                reason: "deploy aborted".to_string(),
                rolled_back_to: Some(1),
            }
        );
        assert_eq!(cluster.running_images("svc"), vec!["myrepo:v1"; 2]);
        assert_eq!(cluster.get_service_state("svc").await.unwrap().desired_count, 2);
    }

    #[tokio::test]
    async fn test_cancel_during_final_batch_rolls_back() {
        // Whole service replaced in one batch, so the health wait is the last step
        let (cluster, gate) = service(2);
        cluster.set_pending_polls(10);
        let orchestrator = Arc::new(DeployOrchestrator::new(DeploySettings {
            health_check_interval: Duration::from_millis(5),
            ..settings()
        }));
        let cancel = CancellationToken::new();

        let handle = spawn_deploy(&orchestrator, &gate, "myrepo:v2", &cancel);

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(gate.is_deploying());
        cancel.cancel();

        let result = handle.await.unwrap();
        assert_eq!(
            result,
            DeployResult::Failed {
                reason: "deploy aborted".to_string(),
                rolled_back_to: Some(1),
            }
        );
        assert_eq!(cluster.current_image("svc", "web").as_deref(), Some("myrepo:v1"));
        assert_eq!(cluster.running_images("svc"), vec!["myrepo:v1"; 2]);
    }

    #[tokio::test]
    async fn test_concurrent_deploys_run_in_order() {
        let (cluster, gate) = service(2);
        cluster.set_pending_polls(2);
        let orchestrator = Arc::new(DeployOrchestrator::new(settings()));

        let mut handles = Vec::new();
        for image in ["myrepo:v2", "myrepo:v3"] {
            let orchestrator = Arc::clone(&orchestrator);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                let descriptor = descriptor::build("web", image).unwrap();
                orchestrator
                    .deploy(&descriptor, &gate, &CancellationToken::new(), far_deadline())
                    .await
            }));
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(
            results,
            vec![
                DeployResult::Succeeded { revision: 2 },
                DeployResult::Succeeded { revision: 3 }
            ]
        );
        assert_eq!(cluster.running_images("svc"), vec!["myrepo:v3"; 2]);
    }
}
