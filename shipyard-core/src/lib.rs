//! Shipyard Core
//!
//! Core types and abstractions for the Shipyard deployment orchestrator.
//!
//! This crate contains:
//! - Domain types: images, triggers, deployment descriptors, pipeline runs,
//!   service state and scaling policy
//! - Collaborator traits: the narrow surfaces to the registry, the container
//!   orchestrator and the metrics source
//! - Error taxonomy shared by every stage
//! - DTOs: Data transfer objects for the deployer status API

pub mod collaborator;
pub mod domain;
pub mod dto;
pub mod error;
