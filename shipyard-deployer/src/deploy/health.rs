//! Health check waits for freshly started instances

use shipyard_core::domain::service::HealthStatus;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::gate::ServiceGate;

/// Polls each instance until it reports a verdict or `timeout` elapses
///
/// Instances still pending at the timeout count as unhealthy. Results come
/// back in the order of `instance_ids`.
pub async fn await_health(
    gate: &ServiceGate,
    instance_ids: &[String],
    timeout: Duration,
    interval: Duration,
) -> Vec<(String, HealthStatus)> {
    let deadline = Instant::now() + timeout;
    let mut verdicts: HashMap<&str, HealthStatus> = HashMap::new();

    loop {
        for id in instance_ids {
            if verdicts.contains_key(id.as_str()) {
                continue;
            }

            match gate.instance_health(id).await {
                Ok(HealthStatus::Pending) => {}
                Ok(status) => {
                    debug!("Instance {} reported {}", id, status);
                    verdicts.insert(id.as_str(), status);
                }
                Err(e) => warn!("Health check for instance {} failed: {}", id, e),
            }
        }

        if verdicts.len() == instance_ids.len() {
            break;
        }

        if Instant::now() >= deadline {
            warn!(
                "{} instance(s) did not become healthy within {:?}",
                instance_ids.len() - verdicts.len(),
                timeout
            );
            break;
        }

        tokio::time::sleep(interval).await;
    }

    instance_ids
        .iter()
        .map(|id| {
            let status = verdicts
                .get(id.as_str())
                .copied()
                .unwrap_or(HealthStatus::Unhealthy);
            (id.clone(), status)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryCluster;
    use std::sync::Arc;

    async fn started(cluster: &Arc<MemoryCluster>, gate: &ServiceGate) -> String {
        use shipyard_core::collaborator::ContainerOrchestrator;
        cluster.start_instance(gate.service_id(), 1).await.unwrap().id
    }

    #[tokio::test]
    async fn test_waits_through_pending_polls() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_service("svc", "web", "myrepo:v1", 0);
        cluster.set_pending_polls(2);
        let gate = ServiceGate::new("svc", cluster.clone());

        let id = started(&cluster, &gate).await;
        let results = await_health(
            &gate,
            &[id.clone()],
            Duration::from_secs(5),
            Duration::from_millis(1),
        )
        .await;

        assert_eq!(results, vec![(id, HealthStatus::Healthy)]);
    }

    #[tokio::test]
    async fn test_pending_past_timeout_is_unhealthy() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_service("svc", "web", "myrepo:v1", 0);
        cluster.set_pending_polls(u32::MAX);
        let gate = ServiceGate::new("svc", cluster.clone());

        let id = started(&cluster, &gate).await;
        let results = await_health(
            &gate,
            &[id.clone()],
            Duration::from_millis(20),
            Duration::from_millis(5),
        )
        .await;

        assert_eq!(results, vec![(id, HealthStatus::Unhealthy)]);
    }
}
