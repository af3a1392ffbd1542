//! Core domain types
//!
//! This module contains the core domain structures used across Shipyard crates.
//! They are shared between the deployer (which drives them) and the client and
//! CLI (which report on them).

pub mod descriptor;
pub mod image;
pub mod pipeline;
pub mod scaling;
pub mod service;
