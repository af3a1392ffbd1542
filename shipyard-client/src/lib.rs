//! Shipyard HTTP Clients
//!
//! Type-safe HTTP clients for everything Shipyard talks to over the network:
//!
//! - [`DeployerClient`]: the deployer's status API, used by the CLI
//! - [`HttpRegistry`]: a Docker Registry v2 endpoint (push detection and
//!   image existence checks)
//! - [`HttpCluster`]: the container orchestration control plane
//! - [`HttpMetrics`]: the utilization metrics endpoint
//!
//! The last three implement the collaborator traits of `shipyard-core`.
//!
//! # Example
//!
//! ```no_run
//! use shipyard_client::DeployerClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = DeployerClient::new("http://localhost:8080")?;
//!
//!     for run in client.list_runs().await? {
//!         println!("run {}: {:?}", run.id, run.status);
//!     }
//!     Ok(())
//! }
//! ```

mod cluster;
pub mod error;
mod metrics;
mod registry;
mod runs;

pub use cluster::HttpCluster;
pub use error::{ClientError, Result};
pub use metrics::HttpMetrics;
pub use registry::HttpRegistry;

use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Request timeout used when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds a reqwest client whose requests give up after `timeout`
pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// HTTP client for the deployer status API
///
/// Methods are organized into logical groups:
/// - Pipeline runs (list, get, abort)
/// - Registry pushes
/// - Service state
#[derive(Debug, Clone)]
pub struct DeployerClient {
    /// Base URL of the deployer (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl DeployerClient {
    /// Create a new deployer client with [`DEFAULT_TIMEOUT`]
    ///
    /// # Example
    /// ```
    /// use shipyard_client::DeployerClient;
    ///
    /// let client = DeployerClient::new("http://localhost:8080").unwrap();
    /// ```
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self::with_client(base_url, http_client(DEFAULT_TIMEOUT)?))
    }

    /// Create a new deployer client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            client,
        }
    }

    /// Get the base URL of the deployer
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

// =============================================================================
// Response Handlers
// =============================================================================

pub(crate) fn normalize_base_url(base_url: impl Into<String>) -> String {
    base_url.into().trim_end_matches('/').to_string()
}

/// Checks the status code and deserializes a JSON body
pub(crate) async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    response
        .json()
        .await
        .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
}

/// Checks the status code of a response without a body
pub(crate) async fn handle_empty_response(response: reqwest::Response) -> Result<()> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    Ok(())
}
