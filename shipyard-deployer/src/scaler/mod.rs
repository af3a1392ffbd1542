//! Autoscaler control loop
//!
//! Samples utilization on a fixed interval and writes the target-tracking
//! decision to the service's `desired_count`. Writes go through the service
//! gate, so a cycle that lands during a deploy waits for it to finish (up to
//! the gate timeout) and then evaluates against fresh state.

use shipyard_core::collaborator::MetricsSource;
use shipyard_core::domain::scaling::{ScalingDecision, ScalingPolicy, evaluate};
use shipyard_core::error::ScalingError;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::gate::{GatePurpose, ServiceGate};

#[derive(Default)]
struct Cooldowns {
    last_scale_out: Option<Instant>,
    last_scale_in: Option<Instant>,
}

pub struct Autoscaler {
    policy: ScalingPolicy,
    gate: Arc<ServiceGate>,
    metrics: Arc<dyn MetricsSource>,
    interval: Duration,
    gate_timeout: Duration,
    cooldowns: Mutex<Cooldowns>,
}

impl Autoscaler {
    pub fn new(
        policy: ScalingPolicy,
        gate: Arc<ServiceGate>,
        metrics: Arc<dyn MetricsSource>,
        interval: Duration,
        gate_timeout: Duration,
    ) -> Self {
        Self {
            policy,
            gate,
            metrics,
            interval,
            gate_timeout,
            cooldowns: Mutex::new(Cooldowns::default()),
        }
    }

    pub fn from_config(
        config: &Config,
        gate: Arc<ServiceGate>,
        metrics: Arc<dyn MetricsSource>,
    ) -> Self {
        Self::new(
            config.scaling.clone(),
            gate,
            metrics,
            config.scale_interval,
            config.scale_gate_timeout,
        )
    }

    fn cooldowns(&self) -> MutexGuard<'_, Cooldowns> {
        self.cooldowns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Evaluates until `shutdown` fires; failed cycles are logged and skipped
    ///
    /// A cycle already holding the gate finishes its write first.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            "Autoscaler started for {} (every {:?}, capacity {}..={})",
            self.gate.service_id(),
            self.interval,
            self.policy.min_capacity,
            self.policy.max_capacity
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Ok(decision) if decision.is_change() => {
                    debug!("Scaling cycle applied {:?}", decision)
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping scaling cycle for {}: {}", self.gate.service_id(), e),
            }
        }

        info!("Autoscaler stopped for {}", self.gate.service_id());
    }

    /// Runs one evaluation cycle
    pub async fn tick(&self) -> Result<ScalingDecision, ScalingError> {
        let utilization = self
            .metrics
            .get_utilization(self.gate.service_id())
            .await
            .map_err(ScalingError::MetricsUnavailable)?;

        if self.gate.is_deploying() {
            info!(
                "Deploy in progress on {} ({} more queued), deferring scaling until it completes",
                self.gate.service_id(),
                self.gate.queued_deploys()
            );
        }

        let mut guard = timeout(self.gate_timeout, self.gate.acquire(GatePurpose::Scale))
            .await
            .map_err(|_| ScalingError::GateTimeout)?;

        let mut state = self
            .gate
            .service_state()
            .await
            .map_err(ScalingError::StateUnavailable)?;
        state.cpu_utilization = utilization.cpu_percent;
        state.mem_utilization = utilization.mem_percent;

        let decision = self.apply_cooldowns(evaluate(&state, &self.policy));

        match &decision {
            ScalingDecision::NoChange { current } => {
                debug!(
                    "{} stays at {} (cpu {:.1}%, memory {:.1}%)",
                    self.gate.service_id(),
                    current,
                    state.cpu_utilization,
                    state.mem_utilization
                );
                return Ok(decision);
            }
            ScalingDecision::ScaleUp { from, to, reason }
            | ScalingDecision::ScaleDown { from, to, reason } => {
                info!(
                    "Scaling {} from {} to {}: {}",
                    self.gate.service_id(),
                    from,
                    to,
                    reason
                );
            }
        }

        guard
            .set_desired_count(decision.target())
            .await
            .map_err(ScalingError::WriteRejected)?;

        let mut cooldowns = self.cooldowns();
        match decision {
            ScalingDecision::ScaleUp { .. } => cooldowns.last_scale_out = Some(Instant::now()),
            ScalingDecision::ScaleDown { .. } => cooldowns.last_scale_in = Some(Instant::now()),
            ScalingDecision::NoChange { .. } => {}
        }

        Ok(decision)
    }

    /// Holds back a change that follows too soon after the previous one
    ///
    /// Scale-in also waits out the scale-in cooldown after a scale-out.
    fn apply_cooldowns(&self, decision: ScalingDecision) -> ScalingDecision {
        let cooldowns = self.cooldowns();
        let within = |last: Option<Instant>, period: Duration| {
            last.is_some_and(|at| at.elapsed() < period)
        };

        let cooling = match &decision {
            ScalingDecision::ScaleUp { .. } => {
                within(cooldowns.last_scale_out, self.policy.scale_out_cooldown)
            }
            ScalingDecision::ScaleDown { .. } => {
                within(cooldowns.last_scale_in, self.policy.scale_in_cooldown)
                    || within(cooldowns.last_scale_out, self.policy.scale_in_cooldown)
            }
            ScalingDecision::NoChange { .. } => false,
        };

        match decision {
            ScalingDecision::ScaleUp { from, to, .. } | ScalingDecision::ScaleDown { from, to, .. }
                if cooling =>
            {
                debug!("Cooldown active, holding {} instead of {}", from, to);
                ScalingDecision::NoChange { current: from }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryCluster;
    use shipyard_core::collaborator::ContainerOrchestrator;

    fn scaler(cluster: &Arc<MemoryCluster>, policy: ScalingPolicy) -> (Arc<Autoscaler>, Arc<ServiceGate>) {
        let gate = Arc::new(ServiceGate::new("svc", cluster.clone()));
        let scaler = Arc::new(Autoscaler::new(
            policy,
            Arc::clone(&gate),
            cluster.clone(),
            Duration::from_secs(60),
            Duration::from_millis(50),
        ));
        (scaler, gate)
    }

    fn cluster(desired: u32) -> Arc<MemoryCluster> {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_service("svc", "web", "myrepo:v1", desired);
        cluster
    }

    async fn desired(cluster: &MemoryCluster) -> u32 {
        cluster.get_service_state("svc").await.unwrap().desired_count
    }

    #[tokio::test]
    async fn test_hot_cpu_scales_out() {
        let cluster = cluster(2);
        cluster.set_utilization("svc", 85.0, 50.0);
        let (scaler, _) = scaler(&cluster, ScalingPolicy::default());

        let decision = scaler.tick().await.unwrap();

        assert_eq!(
            decision,
            ScalingDecision::ScaleUp {
                from: 2,
                to: 3,
                reason: "cpu 85.0% above target 70%".to_string(),
            }
        );
        assert_eq!(desired(&cluster).await, 3);
    }

    #[tokio::test]
    async fn test_idle_service_scales_in() {
        let cluster = cluster(4);
        cluster.set_utilization("svc", 10.0, 20.0);
        let (scaler, _) = scaler(&cluster, ScalingPolicy::default());

        let decision = scaler.tick().await.unwrap();

        assert!(matches!(decision, ScalingDecision::ScaleDown { from: 4, .. }));
        assert!(desired(&cluster).await < 4);
        assert!(desired(&cluster).await >= 1);
    }

    #[tokio::test]
    async fn test_metrics_outage_skips_cycle() {
        let cluster = cluster(2);
        cluster.set_utilization("svc", 95.0, 95.0);
        cluster.set_metrics_down(true);
        let (scaler, _) = scaler(&cluster, ScalingPolicy::default());

        let result = scaler.tick().await;

        assert!(matches!(result, Err(ScalingError::MetricsUnavailable(_))));
        assert_eq!(desired(&cluster).await, 2);
    }

    #[tokio::test]
    async fn test_gate_timeout_while_deploying() {
        let cluster = cluster(2);
        cluster.set_utilization("svc", 85.0, 50.0);
        let (scaler, gate) = scaler(&cluster, ScalingPolicy::default());

        let _deploy = gate.acquire(GatePurpose::Deploy).await;
        let result = scaler.tick().await;

        assert!(matches!(result, Err(ScalingError::GateTimeout)));
        assert_eq!(desired(&cluster).await, 2);
    }

    #[tokio::test]
    async fn test_write_deferred_until_deploy_completes() {
        let cluster = cluster(2);
        cluster.set_utilization("svc", 85.0, 50.0);
        let gate = Arc::new(ServiceGate::new("svc", cluster.clone()));
        let scaler = Arc::new(Autoscaler::new(
            ScalingPolicy::default(),
            Arc::clone(&gate),
            cluster.clone(),
            Duration::from_secs(60),
            Duration::from_secs(5),
        ));

        let deploy = gate.acquire(GatePurpose::Deploy).await;
        let pending = {
            let scaler = Arc::clone(&scaler);
            tokio::spawn(async move { scaler.tick().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(desired(&cluster).await, 2);

        drop(deploy);
        let decision = pending.await.unwrap().unwrap();
        assert_eq!(decision.target(), 3);
        assert_eq!(desired(&cluster).await, 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let cluster = cluster(2);
        let (scaler, _) = scaler(&cluster, ScalingPolicy::default());
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(Arc::clone(&scaler).run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_scale_out_cooldown() {
        let cluster = cluster(2);
        cluster.set_utilization("svc", 85.0, 50.0);
        let (scaler, _) = scaler(&cluster, ScalingPolicy::default());

        assert_eq!(scaler.tick().await.unwrap().target(), 3);
        let second = scaler.tick().await.unwrap();

        assert_eq!(second, ScalingDecision::NoChange { current: 3 });
        assert_eq!(desired(&cluster).await, 3);
    }

    #[tokio::test]
    async fn test_no_cooldown_when_disabled() {
        let cluster = cluster(2);
        cluster.set_utilization("svc", 85.0, 50.0);
        let policy = ScalingPolicy {
            scale_out_cooldown: Duration::ZERO,
            ..ScalingPolicy::default()
        };
        let (scaler, _) = scaler(&cluster, policy);

        scaler.tick().await.unwrap();
        scaler.tick().await.unwrap();

        assert_eq!(desired(&cluster).await, 4);
    }
}
