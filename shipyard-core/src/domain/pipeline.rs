//! Pipeline run domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::image::TriggerEvent;

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Source,
    Build,
    Deploy,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Source => write!(f, "Source"),
            Stage::Build => write!(f, "Build"),
            Stage::Deploy => write!(f, "Deploy"),
        }
    }
}

/// Coarse run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "Pending"),
            RunStatus::Running => write!(f, "Running"),
            RunStatus::Succeeded => write!(f, "Succeeded"),
            RunStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Controller state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Sourcing,
    Building,
    Deploying,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`
    ///
    /// Stages advance strictly in order; any non-terminal state may fail.
    pub fn can_transition_to(self, next: RunState) -> bool {
        match (self, next) {
            (RunState::Idle, RunState::Sourcing)
            | (RunState::Sourcing, RunState::Building)
            | (RunState::Building, RunState::Deploying)
            | (RunState::Deploying, RunState::Succeeded) => true,
            (from, RunState::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Named output handed from one stage to the next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub content: String,
}

/// Why and where a run failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: Stage,
    pub reason: String,
}

/// One pipeline execution, created per trigger and never reused
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: u64,
    pub trigger: TriggerEvent,
    pub state: RunState,
    pub stage: Stage,
    pub status: RunStatus,
    pub artifacts: Vec<Artifact>,
    pub failure: Option<RunFailure>,
    /// Every state the run has been in, oldest first
    pub transitions: Vec<RunState>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(id: u64, trigger: TriggerEvent) -> Self {
        Self {
            id,
            trigger,
            state: RunState::Idle,
            stage: Stage::Source,
            status: RunStatus::Pending,
            artifacts: Vec::new(),
            failure: None,
            transitions: vec![RunState::Idle],
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Moves the state machine forward
    ///
    /// Returns false (and leaves the run untouched) for an illegal transition.
    pub fn advance(&mut self, next: RunState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }

        match next {
            RunState::Sourcing => {
                self.stage = Stage::Source;
                self.status = RunStatus::Running;
            }
            RunState::Building => self.stage = Stage::Build,
            RunState::Deploying => self.stage = Stage::Deploy,
            RunState::Succeeded => {
                self.status = RunStatus::Succeeded;
                self.finished_at = Some(Utc::now());
            }
            RunState::Failed => {
                self.status = RunStatus::Failed;
                self.finished_at = Some(Utc::now());
            }
            RunState::Idle => {}
        }

        self.state = next;
        self.transitions.push(next);
        true
    }

    /// Terminates the run in the current stage with a reason
    pub fn fail(&mut self, reason: impl Into<String>) {
        let stage = self.stage;
        if self.advance(RunState::Failed) {
            self.failure = Some(RunFailure {
                stage,
                reason: reason.into(),
            });
        }
    }

    pub fn add_artifact(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.artifacts.push(Artifact {
            name: name.into(),
            content: content.into(),
        });
    }

    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::image::ImageReference;

    fn run() -> PipelineRun {
        PipelineRun::new(1, TriggerEvent::new(ImageReference::new("myrepo", "latest")))
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut run = run();
        assert_eq!(run.status, RunStatus::Pending);

        assert!(run.advance(RunState::Sourcing));
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.advance(RunState::Building));
        assert!(run.advance(RunState::Deploying));
        assert_eq!(run.stage, Stage::Deploy);
        assert!(run.advance(RunState::Succeeded));

        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(run.finished_at.is_some());
        assert_eq!(
            run.transitions,
            vec![
                RunState::Idle,
                RunState::Sourcing,
                RunState::Building,
                RunState::Deploying,
                RunState::Succeeded
            ]
        );
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut run = run();
        assert!(!run.advance(RunState::Deploying));
        assert!(!run.advance(RunState::Succeeded));
        assert_eq!(run.state, RunState::Idle);
    }

    #[test]
    fn test_fail_records_stage_and_is_final() {
        let mut run = run();
        run.advance(RunState::Sourcing);
        run.advance(RunState::Building);
        run.fail("container name cannot be empty");

        let failure = run.failure.clone().unwrap();
        assert_eq!(failure.stage, Stage::Build);
        assert_eq!(run.status, RunStatus::Failed);

        // Terminal runs never move again
        run.fail("second failure");
        assert!(!run.advance(RunState::Deploying));
        assert_eq!(run.failure.unwrap().reason, "container name cannot be empty");
    }
}
