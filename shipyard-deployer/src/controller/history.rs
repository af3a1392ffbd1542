//! In-memory run history
//!
//! Holds the most recent runs for the status API. Nothing survives a
//! restart.

use shipyard_core::domain::pipeline::PipelineRun;
use std::collections::VecDeque;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Runs kept when no capacity is given
pub const DEFAULT_CAPACITY: usize = 100;

/// Bounded store of run reports, newest first
pub struct RunHistory {
    runs: RwLock<VecDeque<PipelineRun>>,
    capacity: usize,
}

impl Default for RunHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl RunHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            runs: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<PipelineRun>> {
        self.runs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<PipelineRun>> {
        self.runs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a new run or replaces the stored copy of an existing one
    pub fn upsert(&self, run: &PipelineRun) {
        let mut runs = self.write();

        if let Some(stored) = runs.iter_mut().find(|r| r.id == run.id) {
            *stored = run.clone();
            return;
        }

        runs.push_front(run.clone());
        runs.truncate(self.capacity);
    }

    pub fn list(&self) -> Vec<PipelineRun> {
        self.read().iter().cloned().collect()
    }

    pub fn get(&self, id: u64) -> Option<PipelineRun> {
        self.read().iter().find(|r| r.id == id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::domain::image::{ImageReference, TriggerEvent};
    use shipyard_core::domain::pipeline::RunState;

    fn run(id: u64) -> PipelineRun {
        PipelineRun::new(id, TriggerEvent::new(ImageReference::new("myrepo", "latest")))
    }

    #[test]
    fn test_newest_first_and_bounded() {
        let history = RunHistory::with_capacity(2);
        history.upsert(&run(1));
        history.upsert(&run(2));
        history.upsert(&run(3));

        let ids: Vec<u64> = history.list().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2]);
        assert!(history.get(1).is_none());
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let history = RunHistory::default();
        let mut first = run(1);
        history.upsert(&first);
        history.upsert(&run(2));

        first.advance(RunState::Sourcing);
        history.upsert(&first);

        assert_eq!(history.list().len(), 2);
        assert_eq!(history.get(1).unwrap().state, RunState::Sourcing);
        assert_eq!(history.list()[0].id, 2);
    }
}
