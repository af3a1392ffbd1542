//! Registry watcher
//!
//! Filters registry pushes down to the watched repository and tag and turns
//! the accepted ones into triggers on the run queue.

use shipyard_core::collaborator::Registry;
use shipyard_core::domain::image::{ImageReference, TriggerEvent};
use shipyard_core::error::{CollaboratorError, TriggerError};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::controller::RunQueue;

pub struct RegistryWatcher {
    repository: String,
    tag: String,
    queue: Arc<RunQueue>,
}

impl RegistryWatcher {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>, queue: Arc<RunQueue>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
            queue,
        }
    }

    /// Checks a push against the watched repository and tag
    ///
    /// Returns whether the tag is the watched one. Malformed pushes and
    /// pushes from other repositories are rejected.
    pub fn is_watched(&self, image: &ImageReference) -> Result<bool, TriggerError> {
        if image.repository_id.trim().is_empty() || image.tag.trim().is_empty() {
            warn!("Dropping malformed push: {:?}", image);
            return Err(TriggerError::Malformed(format!(
                "repository '{}' and tag '{}' must both be set",
                image.repository_id, image.tag
            )));
        }

        if image.repository_id != self.repository {
            warn!("Dropping push from unwatched repository {}", image.repository_id);
            return Err(TriggerError::Unauthorized(image.repository_id.clone()));
        }

        if image.tag != self.tag {
            debug!("Ignoring push of {} (watching tag {})", image, self.tag);
            return Ok(false);
        }

        Ok(true)
    }

    /// Handles one push
    ///
    /// Pushes of the watched tag are queued and returned. Other tags of the
    /// watched repository are ignored.
    pub fn on_push(&self, image: ImageReference) -> Result<Option<TriggerEvent>, TriggerError> {
        if !self.is_watched(&image)? {
            return Ok(None);
        }

        let event = TriggerEvent::new(image);
        let coalesced = self.queue.push(event.clone());
        info!(
            "Accepted push of {} as trigger {}{}",
            event.image,
            event.id,
            if coalesced { " (replaced a queued trigger)" } else { "" }
        );

        Ok(Some(event))
    }

    /// Feeds the registry's push stream into the run queue until it closes
    pub async fn run(self: Arc<Self>, registry: Arc<dyn Registry>) -> Result<(), CollaboratorError> {
        let mut pushes = registry.watch(&self.repository, &self.tag).await?;
        info!("Watching {}:{} for pushes", self.repository, self.tag);

        while let Some(image) = pushes.recv().await {
            if let Err(e) = self.on_push(image) {
                debug!("Push from registry stream not queued: {}", e);
            }
        }

        warn!("Push stream for {}:{} closed", self.repository, self.tag);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryRegistry;
    use std::time::Duration;

    fn watcher() -> (Arc<RegistryWatcher>, Arc<RunQueue>) {
        let queue = Arc::new(RunQueue::new());
        let watcher = Arc::new(RegistryWatcher::new("myrepo", "latest", Arc::clone(&queue)));
        (watcher, queue)
    }

    #[test]
    fn test_watched_tag_is_queued() {
        let (watcher, queue) = watcher();

        let event = watcher
            .on_push(ImageReference::new("myrepo", "latest"))
            .unwrap()
            .unwrap();

        assert_eq!(event.image, ImageReference::new("myrepo", "latest"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_other_tag_is_ignored() {
        let (watcher, queue) = watcher();

        let result = watcher.on_push(ImageReference::new("myrepo", "dev"));

        assert_eq!(result.unwrap().map(|e| e.id), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_rejections() {
        let (watcher, queue) = watcher();

        assert!(matches!(
            watcher.on_push(ImageReference::new("", "latest")),
            Err(TriggerError::Malformed(_))
        ));
        assert!(matches!(
            watcher.on_push(ImageReference::new("myrepo", " ")),
            Err(TriggerError::Malformed(_))
        ));
        assert_eq!(
            watcher
                .on_push(ImageReference::new("otherrepo", "latest"))
                .map(|e| e.map(|e| e.id)),
            Err(TriggerError::Unauthorized("otherrepo".to_string()))
        );
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_burst_of_pushes_coalesces() {
        let (watcher, queue) = watcher();

        watcher.on_push(ImageReference::new("myrepo", "latest")).unwrap();
        let last = watcher
            .on_push(ImageReference::new("myrepo", "latest"))
            .unwrap()
            .unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await.id, last.id);
    }

    #[test]
    fn test_is_watched_does_not_queue() {
        let (watcher, queue) = watcher();

        assert!(watcher.is_watched(&ImageReference::new("myrepo", "latest")).unwrap());
        assert!(!watcher.is_watched(&ImageReference::new("myrepo", "dev")).unwrap());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_run_consumes_push_stream() {
        let (watcher, queue) = watcher();
        let registry = Arc::new(MemoryRegistry::new());

        tokio::spawn(Arc::clone(&watcher).run(registry.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;

        registry.push(ImageReference::new("myrepo", "dev"));
        registry.push(ImageReference::new("myrepo", "latest"));

        let event = tokio::time::timeout(Duration::from_secs(1), queue.next())
            .await
            .unwrap();
        assert_eq!(event.image.tag, "latest");
        assert!(queue.is_empty());
    }
}
