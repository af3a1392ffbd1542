//! Pending trigger queue
//!
//! Triggers wait here until the controller is free. A newer push for a tag
//! that already has a queued trigger replaces it in place, so a burst of
//! pushes results in one run per tag. Runs already started are never
//! touched.

use shipyard_core::domain::image::TriggerEvent;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;

/// FIFO of triggers awaiting a run
#[derive(Default)]
pub struct RunQueue {
    pending: Mutex<VecDeque<TriggerEvent>>,
    notify: Notify,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<TriggerEvent>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueues a trigger
    ///
    /// Returns true when it superseded a queued trigger for the same image.
    pub fn push(&self, event: TriggerEvent) -> bool {
        let coalesced = {
            let mut pending = self.pending();
            match pending.iter_mut().find(|e| e.image == event.image) {
                Some(queued) => {
                    debug!(
                        "Trigger {} for {} supersedes queued trigger {}",
                        event.id, event.image, queued.id
                    );
                    *queued = event;
                    true
                }
                None => {
                    pending.push_back(event);
                    false
                }
            }
        };

        self.notify.notify_one();
        coalesced
    }

    /// Waits for the oldest queued trigger
    pub async fn next(&self) -> TriggerEvent {
        loop {
            if let Some(event) = self.pending().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::domain::image::ImageReference;
    use std::sync::Arc;
    use std::time::Duration;

    fn trigger(tag: &str) -> TriggerEvent {
        TriggerEvent::new(ImageReference::new("myrepo", tag))
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = RunQueue::new();
        let first = trigger("latest");
        let second = trigger("stable");

        queue.push(first.clone());
        queue.push(second.clone());

        assert_eq!(queue.next().await.id, first.id);
        assert_eq!(queue.next().await.id, second.id);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_newer_push_replaces_queued_trigger() {
        let queue = RunQueue::new();
        let older = trigger("latest");
        let newer = trigger("latest");

        assert!(!queue.push(older));
        assert!(queue.push(newer.clone()));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await.id, newer.id);
    }

    #[tokio::test]
    async fn test_next_waits_for_push() {
        let queue = Arc::new(RunQueue::new());

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let event = trigger("latest");
        queue.push(event.clone());

        let received = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.id, event.id);
    }
}
