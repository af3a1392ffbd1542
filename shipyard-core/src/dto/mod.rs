//! Data Transfer Objects
//!
//! This module contains DTOs exchanged over HTTP: between the CLI and the
//! deployer status API, and between the deployer and the cluster control
//! plane. DTOs are lightweight representations of domain entities optimized
//! for network transfer.

pub mod registry;
pub mod run;
pub mod service;
