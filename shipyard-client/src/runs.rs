//! Deployer status API endpoints

use crate::error::Result;
use crate::{DeployerClient, handle_response};
use shipyard_core::domain::pipeline::PipelineRun;
use shipyard_core::domain::service::ServiceState;
use shipyard_core::dto::registry::{PushNotification, PushResponse};
use shipyard_core::dto::run::{AbortResponse, RunSummary};

impl DeployerClient {
    // =============================================================================
    // Pipeline Runs
    // =============================================================================

    /// List recent pipeline runs, newest first
    pub async fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let url = format!("{}/runs", self.base_url);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }

    /// Get a pipeline run by id
    ///
    /// # Arguments
    /// * `run_id` - The run id
    pub async fn get_run(&self, run_id: u64) -> Result<PipelineRun> {
        let url = format!("{}/runs/{}", self.base_url, run_id);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }

    /// Abort the in-flight run
    ///
    /// The deployer honors the abort between stages, or after the current
    /// swap step when the run is deploying.
    pub async fn abort_run(&self) -> Result<AbortResponse> {
        let url = format!("{}/runs/abort", self.base_url);
        let response = self.client.post(&url).send().await?;

        handle_response(response).await
    }

    // =============================================================================
    // Registry & Service
    // =============================================================================

    /// Notify the deployer of a registry push
    ///
    /// # Example
    /// ```no_run
    /// # use shipyard_client::DeployerClient;
    /// # use shipyard_core::dto::registry::PushNotification;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = DeployerClient::new("http://localhost:8080")?;
    /// let outcome = client.notify_push(PushNotification {
    ///     repository: "eniro/tegola".to_string(),
    ///     tag: "latest".to_string(),
    /// }).await?;
    /// assert!(outcome.accepted);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn notify_push(&self, push: PushNotification) -> Result<PushResponse> {
        let url = format!("{}/registry/push", self.base_url);
        let response = self.client.post(&url).json(&push).send().await?;

        handle_response(response).await
    }

    /// Get the current state of the managed service
    pub async fn service_state(&self) -> Result<ServiceState> {
        let url = format!("{}/service", self.base_url);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }
}
