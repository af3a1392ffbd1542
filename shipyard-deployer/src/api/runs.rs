//! Pipeline run API handlers

use axum::{
    Json,
    extract::{Path, State},
};
use shipyard_core::domain::pipeline::PipelineRun;
use shipyard_core::dto::run::{AbortResponse, RunSummary};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// GET /runs
/// List recent runs, newest first
pub async fn list_runs(State(state): State<AppState>) -> Json<Vec<RunSummary>> {
    tracing::debug!("Listing runs");

    let runs = state
        .controller
        .history()
        .list()
        .iter()
        .map(RunSummary::from)
        .collect();

    Json(runs)
}

/// GET /runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::debug!("Getting run: {}", id);

    state
        .controller
        .history()
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", id)))
}

/// POST /runs/abort
/// Abort the in-flight run
pub async fn abort_run(State(state): State<AppState>) -> ApiResult<Json<AbortResponse>> {
    let run_id = state
        .controller
        .abort()
        .ok_or_else(|| ApiError::NotFound("No run in progress".to_string()))?;

    Ok(Json(AbortResponse { run_id }))
}
