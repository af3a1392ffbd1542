//! Registry push DTOs

use serde::{Deserialize, Serialize};

use crate::domain::image::ImageReference;

/// Push notification delivered by a registry webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushNotification {
    pub repository: String,
    pub tag: String,
}

impl From<PushNotification> for ImageReference {
    fn from(push: PushNotification) -> Self {
        ImageReference::new(push.repository, push.tag)
    }
}

/// Outcome of a push notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    /// True when the push matched the watched tag and was queued
    pub accepted: bool,
    /// True when the push was for another tag of the watched repository
    pub ignored: bool,
}
