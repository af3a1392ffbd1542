//! Utilization metrics collaborator

use async_trait::async_trait;
use reqwest::Client;
use shipyard_core::collaborator::{CollaboratorResult, MetricsSource};
use shipyard_core::domain::service::Utilization;

use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::{handle_response, http_client, normalize_base_url};

/// Metrics endpoint serving `GET /services/{id}/utilization`
#[derive(Debug, Clone)]
pub struct HttpMetrics {
    base_url: String,
    client: Client,
}

impl HttpMetrics {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url),
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl MetricsSource for HttpMetrics {
    async fn get_utilization(&self, service_id: &str) -> CollaboratorResult<Utilization> {
        let url = format!("{}/services/{}/utilization", self.base_url, service_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ClientError::from)?;

        Ok(handle_response(response).await?)
    }
}
