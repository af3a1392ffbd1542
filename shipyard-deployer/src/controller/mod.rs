//! Pipeline controller
//!
//! Drives each trigger through Source, Build and Deploy, one run at a time.
//! Stage outputs travel between stages as named artifacts on the run: Source
//! produces the image URI, Build produces the descriptor wire text, and
//! Deploy consumes it.

pub mod history;
pub mod queue;

use shipyard_core::collaborator::Registry;
use shipyard_core::domain::descriptor::{self, DESCRIPTOR_ARTIFACT, DeploymentDescriptor};
use shipyard_core::domain::image::TriggerEvent;
use shipyard_core::domain::pipeline::{PipelineRun, RunState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::deploy::{DeployOrchestrator, DeployResult};
use crate::gate::ServiceGate;
pub use history::RunHistory;
pub use queue::RunQueue;

/// Artifact carrying the image URI out of the Source stage
pub const SOURCE_ARTIFACT: &str = "SourceOutput";

/// Controller tuning taken from the configuration
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub registry_host: Option<String>,
    pub container_name: String,
    pub source_timeout: Duration,
    pub build_timeout: Duration,
    pub deploy_timeout: Duration,
}

impl From<&Config> for ControllerSettings {
    fn from(config: &Config) -> Self {
        Self {
            registry_host: config.registry_host().map(str::to_string),
            container_name: config.container_name.clone(),
            source_timeout: config.source_timeout,
            build_timeout: config.build_timeout,
            deploy_timeout: config.deploy_timeout,
        }
    }
}

/// The run currently executing
struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
}

/// Executes pipeline runs from the trigger queue
pub struct PipelineController {
    settings: ControllerSettings,
    registry: Arc<dyn Registry>,
    gate: Arc<ServiceGate>,
    deployer: DeployOrchestrator,
    queue: Arc<RunQueue>,
    history: Arc<RunHistory>,
    next_id: AtomicU64,
    active: Mutex<Option<ActiveRun>>,
    /// Parent of every run's cancellation token
    shutdown: CancellationToken,
}

/// Stage failure; the string is the run's failure reason
type StageResult<T> = Result<T, String>;

impl PipelineController {
    pub fn new(
        settings: ControllerSettings,
        registry: Arc<dyn Registry>,
        gate: Arc<ServiceGate>,
        deployer: DeployOrchestrator,
        queue: Arc<RunQueue>,
        history: Arc<RunHistory>,
    ) -> Self {
        Self {
            settings,
            registry,
            gate,
            deployer,
            queue,
            history,
            next_id: AtomicU64::new(1),
            active: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    #[cfg(test)]
    pub fn queue(&self) -> &Arc<RunQueue> {
        &self.queue
    }

    pub fn history(&self) -> &Arc<RunHistory> {
        &self.history
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Id of the run in progress, if any
    #[cfg(test)]
    pub fn active_run(&self) -> Option<u64> {
        self.active().as_ref().map(|run| run.id)
    }

    /// Requests the in-progress run to stop
    ///
    /// Honored at the next stage boundary, or after the current swap step
    /// while deploying. Returns the id of the run that was signalled.
    pub fn abort(&self) -> Option<u64> {
        let active = self.active();
        let run = active.as_ref()?;
        info!("Abort requested for run {}", run.id);
        run.cancel.cancel();
        Some(run.id)
    }

    /// Stops the run loop
    ///
    /// A run in progress is aborted like [`abort`](Self::abort) and finishes
    /// its rollback before [`run`](Self::run) returns.
    pub fn shutdown(&self) {
        info!("Pipeline controller shutting down");
        self.shutdown.cancel();
    }

    /// Executes queued triggers one at a time until shut down
    pub async fn run(self: Arc<Self>) {
        info!("Pipeline controller started for {}", self.gate.service_id());

        loop {
            let trigger = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                trigger = self.queue.next() => trigger,
            };
            self.execute(trigger).await;
        }

        info!("Pipeline controller stopped");
    }

    /// Runs one trigger through every stage to a terminal state
    pub async fn execute(&self, trigger: TriggerEvent) -> PipelineRun {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = self.shutdown.child_token();
        *self.active() = Some(ActiveRun {
            id,
            cancel: cancel.clone(),
        });

        let mut run = PipelineRun::new(id, trigger);
        info!("Run {} started for {}", id, run.trigger.image);
        self.history.upsert(&run);

        match self.drive(&mut run, &cancel).await {
            Ok(()) => {
                run.advance(RunState::Succeeded);
                info!("Run {} succeeded", id);
            }
            Err(reason) => {
                error!("Run {} failed at {}: {}", id, run.stage, reason);
                run.fail(reason);
            }
        }

        *self.active() = None;
        self.history.upsert(&run);
        run
    }

    async fn drive(&self, run: &mut PipelineRun, cancel: &CancellationToken) -> StageResult<()> {
        self.enter(run, RunState::Sourcing, cancel)?;
        let image_uri = self.source(run).await?;
        run.add_artifact(SOURCE_ARTIFACT, image_uri.clone());

        self.enter(run, RunState::Building, cancel)?;
        let descriptor = self.build(image_uri).await?;
        run.add_artifact(DESCRIPTOR_ARTIFACT, descriptor.to_wire());

        self.enter(run, RunState::Deploying, cancel)?;
        self.deploy(run, cancel).await
    }

    /// Moves to the next stage unless an abort arrived
    fn enter(
        &self,
        run: &mut PipelineRun,
        next: RunState,
        cancel: &CancellationToken,
    ) -> StageResult<()> {
        if cancel.is_cancelled() {
            return Err("run aborted".to_string());
        }
        if !run.advance(next) {
            return Err(format!("illegal transition {:?} -> {:?}", run.state, next));
        }

        debug!("Run {} entered {:?}", run.id, next);
        self.history.upsert(run);
        Ok(())
    }

    /// Confirms the pushed image can be pulled and renders its URI
    async fn source(&self, run: &PipelineRun) -> StageResult<String> {
        let image = &run.trigger.image;

        match timeout(self.settings.source_timeout, self.registry.image_exists(image)).await {
            Err(_) => Err(format!(
                "source timed out after {:?}",
                self.settings.source_timeout
            )),
            Ok(Err(e)) => Err(format!("registry lookup failed: {}", e)),
            Ok(Ok(false)) => Err(format!("image {} not found in registry", image)),
            Ok(Ok(true)) => Ok(image.image_uri(self.settings.registry_host.as_deref())),
        }
    }

    /// Renders the descriptor on the blocking pool so the stage timeout can fire
    async fn build(&self, image_uri: String) -> StageResult<DeploymentDescriptor> {
        let container_name = self.settings.container_name.clone();
        let building =
            tokio::task::spawn_blocking(move || descriptor::build(&container_name, &image_uri));

        match timeout(self.settings.build_timeout, building).await {
            Err(_) => Err(format!(
                "build timed out after {:?}",
                self.settings.build_timeout
            )),
            Ok(Err(e)) => Err(format!("build task failed: {}", e)),
            Ok(Ok(result)) => result.map_err(|e| e.to_string()),
        }
    }

    async fn deploy(&self, run: &PipelineRun, cancel: &CancellationToken) -> StageResult<()> {
        let wire = run
            .artifact(DESCRIPTOR_ARTIFACT)
            .ok_or_else(|| format!("missing {} artifact", DESCRIPTOR_ARTIFACT))?;
        let descriptor = DeploymentDescriptor::from_wire(&wire.content).map_err(|e| e.to_string())?;

        let deadline = Instant::now() + self.settings.deploy_timeout;
        match self
            .deployer
            .deploy(&descriptor, &self.gate, cancel, deadline)
            .await
        {
            DeployResult::Succeeded { revision } => {
                info!("Run {} deployed revision {}", run.id, revision);
                Ok(())
            }
            DeployResult::Failed {
                reason,
                rolled_back_to,
            } => {
                if let Some(revision) = rolled_back_to {
                    warn!("Run {} rolled back to revision {}", run.id, revision);
                }
                Err(reason)
            }
        }
    }
}
