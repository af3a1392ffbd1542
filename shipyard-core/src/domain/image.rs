//! Image domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies an immutable container image in a registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub repository_id: String,
    pub tag: String,
}

impl ImageReference {
    pub fn new(repository_id: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository_id: repository_id.into(),
            tag: tag.into(),
        }
    }

    /// Renders the pullable image URI
    ///
    /// With a registry host the result is `<host>/<repository>:<tag>`,
    /// otherwise `<repository>:<tag>`.
    pub fn image_uri(&self, registry_host: Option<&str>) -> String {
        match registry_host.map(|h| h.trim_end_matches('/')) {
            Some(host) if !host.is_empty() => {
                format!("{}/{}:{}", host, self.repository_id, self.tag)
            }
            _ => format!("{}:{}", self.repository_id, self.tag),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository_id, self.tag)
    }
}

/// Emitted once per accepted registry push
///
/// Consumed exactly once by the pipeline controller and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub id: Uuid,
    pub image: ImageReference,
    pub timestamp: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(image: ImageReference) -> Self {
        Self {
            id: Uuid::new_v4(),
            image,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_uri_with_host() {
        let image = ImageReference::new("eniro/tegola", "latest");
        assert_eq!(
            image.image_uri(Some("123456789012.dkr.ecr.eu-west-1.amazonaws.com/")),
            "123456789012.dkr.ecr.eu-west-1.amazonaws.com/eniro/tegola:latest"
        );
    }

    #[test]
    fn test_image_uri_without_host() {
        let image = ImageReference::new("myrepo", "latest");
        assert_eq!(image.image_uri(None), "myrepo:latest");
        assert_eq!(image.image_uri(Some("")), "myrepo:latest");
        assert_eq!(image.to_string(), "myrepo:latest");
    }
}
