//! Pipeline run DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::pipeline::{PipelineRun, RunFailure, RunState, RunStatus, Stage};

/// Lightweight run summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: u64,
    pub image: String,
    pub state: RunState,
    pub stage: Stage,
    pub status: RunStatus,
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        Self {
            id: run.id,
            image: run.trigger.image.to_string(),
            state: run.state,
            stage: run.stage,
            status: run.status,
            failure: run.failure.clone(),
            created_at: run.created_at,
            finished_at: run.finished_at,
        }
    }
}

/// Response to an abort request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortResponse {
    pub run_id: u64,
}
