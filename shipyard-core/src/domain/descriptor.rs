//! Deployment descriptor
//!
//! A descriptor maps container names of the target task template to the image
//! URI their next revision should run. Its wire form is the
//! `imagedefinitions.json` artifact consumed by deploy tooling:
//!
//! ```text
//! [{"name":"web","imageUri":"registry/web:latest"}]
//! ```
//!
//! Downstream parsers read it positionally, so the field order and the absence
//! of whitespace are part of the format.

use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// Artifact name of the serialized descriptor
pub const DESCRIPTOR_ARTIFACT: &str = "imagedefinitions.json";

/// One container entry of a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorEntry {
    pub name: String,
    #[serde(rename = "imageUri")]
    pub image_uri: String,
}

/// Ordered sequence of container/image pairs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentDescriptor {
    pub entries: Vec<DescriptorEntry>,
}

/// Builds a single-container descriptor
///
/// Pure: no side effects beyond the returned value.
pub fn build(container_name: &str, image_uri: &str) -> Result<DeploymentDescriptor, BuildError> {
    if container_name.trim().is_empty() {
        return Err(BuildError::MalformedInput(
            "container name cannot be empty".to_string(),
        ));
    }

    if image_uri.trim().is_empty() {
        return Err(BuildError::MalformedInput(
            "image URI cannot be empty".to_string(),
        ));
    }

    Ok(DeploymentDescriptor {
        entries: vec![DescriptorEntry {
            name: container_name.to_string(),
            image_uri: image_uri.to_string(),
        }],
    })
}

impl DeploymentDescriptor {
    /// Image URI assigned to a container, if present
    pub fn image_for(&self, container_name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name == container_name)
            .map(|e| e.image_uri.as_str())
    }

    /// Container names in descriptor order
    pub fn container_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Serializes to the compact wire format
    pub fn to_wire(&self) -> String {
        // A Vec of two-string structs has no failing serialization path.
        serde_json::to_string(&self.entries).unwrap_or_else(|_| "[]".to_string())
    }

    /// Parses the wire format back into a descriptor
    pub fn from_wire(text: &str) -> Result<Self, BuildError> {
        let entries: Vec<DescriptorEntry> = serde_json::from_str(text)
            .map_err(|e| BuildError::InvalidWireFormat(e.to_string()))?;

        if entries.is_empty() {
            return Err(BuildError::InvalidWireFormat(
                "descriptor has no entries".to_string(),
            ));
        }

        Ok(Self { entries })
    }
}
