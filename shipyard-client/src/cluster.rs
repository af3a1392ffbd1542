//! Container orchestration control plane collaborator

use async_trait::async_trait;
use reqwest::Client;
use shipyard_core::collaborator::{CollaboratorResult, ContainerOrchestrator};
use shipyard_core::domain::descriptor::DeploymentDescriptor;
use shipyard_core::domain::service::{HealthStatus, Instance, ServiceState, TaskRevision};
use shipyard_core::dto::service::{ActivateRevision, InstanceHealth, SetDesiredCount, StartInstance};

use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::{handle_empty_response, handle_response, http_client, normalize_base_url};

/// Control plane reached over its REST API
///
/// Endpoints:
/// - `GET    /services/{id}`
/// - `PUT    /services/{id}/desired-count`
/// - `POST   /services/{id}/task-definitions` (body: descriptor wire format)
/// - `GET    /services/{id}/revision`
/// - `PUT    /services/{id}/revision`
/// - `GET    /services/{id}/instances`
/// - `POST   /services/{id}/instances`
/// - `GET    /instances/{id}/health`
/// - `DELETE /instances/{id}`
#[derive(Debug, Clone)]
pub struct HttpCluster {
    base_url: String,
    client: Client,
}

impl HttpCluster {
    /// Every control plane call fails once it runs longer than `timeout`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url),
            client: http_client(timeout)?,
        })
    }

    fn service_url(&self, service_id: &str, suffix: &str) -> String {
        format!("{}/services/{}{}", self.base_url, service_id, suffix)
    }
}

fn request_error(err: reqwest::Error) -> shipyard_core::error::CollaboratorError {
    ClientError::from(err).into()
}

#[async_trait]
impl ContainerOrchestrator for HttpCluster {
    async fn get_service_state(&self, service_id: &str) -> CollaboratorResult<ServiceState> {
        let response = self
            .client
            .get(self.service_url(service_id, ""))
            .send()
            .await
            .map_err(request_error)?;

        Ok(handle_response(response).await?)
    }

    async fn set_desired_count(&self, service_id: &str, count: u32) -> CollaboratorResult<()> {
        let response = self
            .client
            .put(self.service_url(service_id, "/desired-count"))
            .json(&SetDesiredCount {
                desired_count: count,
            })
            .send()
            .await
            .map_err(request_error)?;

        Ok(handle_empty_response(response).await?)
    }

    async fn update_service_task_definition(
        &self,
        service_id: &str,
        descriptor: &DeploymentDescriptor,
    ) -> CollaboratorResult<TaskRevision> {
        // Sent as the exact artifact text so the control plane parses the
        // same bytes the pipeline produced.
        let response = self
            .client
            .post(self.service_url(service_id, "/task-definitions"))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(descriptor.to_wire())
            .send()
            .await
            .map_err(request_error)?;

        Ok(handle_response(response).await?)
    }

    async fn current_revision(&self, service_id: &str) -> CollaboratorResult<TaskRevision> {
        let response = self
            .client
            .get(self.service_url(service_id, "/revision"))
            .send()
            .await
            .map_err(request_error)?;

        Ok(handle_response(response).await?)
    }

    async fn activate_revision(&self, service_id: &str, revision: u64) -> CollaboratorResult<()> {
        let response = self
            .client
            .put(self.service_url(service_id, "/revision"))
            .json(&ActivateRevision { revision })
            .send()
            .await
            .map_err(request_error)?;

        Ok(handle_empty_response(response).await?)
    }

    async fn list_instances(&self, service_id: &str) -> CollaboratorResult<Vec<Instance>> {
        let response = self
            .client
            .get(self.service_url(service_id, "/instances"))
            .send()
            .await
            .map_err(request_error)?;

        Ok(handle_response(response).await?)
    }

    async fn start_instance(
        &self,
        service_id: &str,
        revision: u64,
    ) -> CollaboratorResult<Instance> {
        let response = self
            .client
            .post(self.service_url(service_id, "/instances"))
            .json(&StartInstance { revision })
            .send()
            .await
            .map_err(request_error)?;

        Ok(handle_response(response).await?)
    }

    async fn instance_health(&self, instance_id: &str) -> CollaboratorResult<HealthStatus> {
        let url = format!("{}/instances/{}/health", self.base_url, instance_id);
        let response = self.client.get(&url).send().await.map_err(request_error)?;

        let health: InstanceHealth = handle_response(response).await?;
        Ok(health.status)
    }

    async fn stop_instance(&self, instance_id: &str) -> CollaboratorResult<()> {
        let url = format!("{}/instances/{}", self.base_url, instance_id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(request_error)?;

        Ok(handle_empty_response(response).await?)
    }
}
