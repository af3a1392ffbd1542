//! Docker Registry v2 collaborator
//!
//! Push detection works by polling the manifest digest of the watched tag:
//! a digest change between two polls is reported as a push.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use shipyard_core::collaborator::{CollaboratorResult, Registry};
use shipyard_core::domain::image::ImageReference;
use shipyard_core::error::CollaboratorError;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::{http_client, normalize_base_url};

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

const DIGEST_HEADER: &str = "docker-content-digest";

/// Registry reached over the Docker Registry HTTP API v2
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    base_url: String,
    client: Client,
    poll_interval: Duration,
}

impl HttpRegistry {
    /// # Arguments
    /// * `base_url` - Registry root (e.g., "https://registry.example.com")
    /// * `poll_interval` - How often the watched tag's digest is checked
    /// * `timeout` - Longest a single registry request may take
    pub fn new(base_url: impl Into<String>, poll_interval: Duration, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url),
            client: http_client(timeout)?,
            poll_interval,
        })
    }

    fn manifest_url(&self, repository: &str, tag: &str) -> String {
        format!("{}/v2/{}/manifests/{}", self.base_url, repository, tag)
    }

    /// Current manifest digest of a tag, `None` if the tag does not exist
    async fn manifest_digest(&self, repository: &str, tag: &str) -> CollaboratorResult<Option<String>> {
        let response = self
            .client
            .head(self.manifest_url(repository, tag))
            .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT)
            .send()
            .await
            .map_err(|e| CollaboratorError::Request(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(
                response
                    .headers()
                    .get(DIGEST_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string(),
            )),
            status => Err(CollaboratorError::Api {
                status: status.as_u16(),
                message: format!("manifest lookup for {}:{} failed", repository, tag),
            }),
        }
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn watch(
        &self,
        repository: &str,
        tag: &str,
    ) -> CollaboratorResult<mpsc::Receiver<ImageReference>> {
        let (tx, rx) = mpsc::channel(16);
        let registry = self.clone();
        let image = ImageReference::new(repository, tag);

        info!(
            "Watching {} every {:?} for digest changes",
            image, self.poll_interval
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.poll_interval);
            let mut last_digest: Option<String> = None;

            loop {
                ticker.tick().await;

                let digest = match registry
                    .manifest_digest(&image.repository_id, &image.tag)
                    .await
                {
                    Ok(Some(digest)) => digest,
                    Ok(None) => {
                        debug!("{} not present in registry yet", image);
                        continue;
                    }
                    Err(e) => {
                        warn!("Failed to poll registry for {}: {}", image, e);
                        continue;
                    }
                };

                // The first digest seen is the baseline, not a push
                let changed = last_digest.as_ref().is_some_and(|prev| *prev != digest);
                last_digest = Some(digest);

                if changed {
                    info!("Detected push to {}", image);
                    if tx.send(image.clone()).await.is_err() {
                        debug!("Push receiver dropped, stopping watch of {}", image);
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn image_exists(&self, image: &ImageReference) -> CollaboratorResult<bool> {
        let digest = self
            .manifest_digest(&image.repository_id, &image.tag)
            .await?;
        Ok(digest.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_url() {
        let registry = HttpRegistry::new(
            "https://registry.local/",
            Duration::from_secs(30),
            crate::DEFAULT_TIMEOUT,
        )
        .unwrap();
        assert_eq!(
            registry.manifest_url("eniro/tegola", "latest"),
            "https://registry.local/v2/eniro/tegola/manifests/latest"
        );
    }
}
