//! Service control plane DTOs
//!
//! Request bodies for the cluster control plane REST API.

use serde::{Deserialize, Serialize};

/// Request to change a service's desired count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDesiredCount {
    pub desired_count: u32,
}

/// Request to make a task revision current
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateRevision {
    pub revision: u64,
}

/// Request to launch one instance of a revision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartInstance {
    pub revision: u64,
}

/// Health check report for an instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceHealth {
    pub instance_id: String,
    pub status: crate::domain::service::HealthStatus,
}
