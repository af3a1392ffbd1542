//! Error taxonomy
//!
//! Each pipeline stage owns one error type. None of them is fatal to the
//! deployer process: trigger errors drop the push, build and deploy errors end
//! the current run, scaling errors skip one evaluation cycle.

use thiserror::Error;

/// Errors reported by external collaborators (registry, cluster, metrics)
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    /// Transport-level failure
    #[error("request failed: {0}")]
    Request(String),

    /// The collaborator answered with an error status
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The addressed resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The response could not be decoded
    #[error("failed to parse response: {0}")]
    Parse(String),
}

/// A registry push that cannot start a run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("malformed push event: {0}")]
    Malformed(String),

    #[error("push from unauthorized repository '{0}'")]
    Unauthorized(String),
}

/// Descriptor input rejected by the builder
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("malformed descriptor input: {0}")]
    MalformedInput(String),

    #[error("invalid descriptor wire format: {0}")]
    InvalidWireFormat(String),
}

/// Failures while rolling a new revision onto a service
#[derive(Debug, Clone, Error)]
pub enum DeployError {
    #[error("container '{0}' is not defined in the service task template")]
    UnknownContainer(String),

    #[error("orchestration API rejected the update: {0}")]
    Rejected(#[from] CollaboratorError),

    #[error("{failures} new instance(s) failed health checks")]
    HealthCheckFailed { failures: u32 },

    #[error("deploy timed out")]
    Timeout,

    #[error("deploy aborted")]
    Aborted,

    #[error("rolling update cannot make progress: {0}")]
    InvalidCapacity(String),
}

/// A skipped autoscaler cycle
#[derive(Debug, Clone, Error)]
pub enum ScalingError {
    #[error("utilization metrics unavailable: {0}")]
    MetricsUnavailable(CollaboratorError),

    #[error("service state unavailable: {0}")]
    StateUnavailable(CollaboratorError),

    #[error("timed out waiting for an in-progress deploy")]
    GateTimeout,

    #[error("desired count write rejected: {0}")]
    WriteRejected(CollaboratorError),
}
