//! Service domain model
//!
//! Represents the running service being deployed to and scaled.

use serde::{Deserialize, Serialize};

use super::descriptor::DeploymentDescriptor;

/// Observed state of a running service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServiceState {
    /// Target number of running instances
    pub desired_count: u32,

    /// Instances currently running, regardless of revision
    pub running_count: u32,

    /// Average CPU utilization in percent
    pub cpu_utilization: f64,

    /// Average memory utilization in percent
    pub mem_utilization: f64,
}

/// Utilization sample from the metrics collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

/// A numbered task template revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRevision {
    pub number: u64,
    pub descriptor: DeploymentDescriptor,
}

impl TaskRevision {
    pub fn defines_container(&self, name: &str) -> bool {
        self.descriptor.image_for(name).is_some()
    }
}

/// Lifecycle of a single service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    Running,
    Stopped,
}

/// A running (or stopped) task of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub revision: u64,
    pub status: InstanceStatus,
}

impl Instance {
    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }
}

/// Health check outcome for an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Still starting, no verdict yet
    Pending,
    Healthy,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Pending => write!(f, "Pending"),
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}
