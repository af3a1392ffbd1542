//! Managed service API handler

use axum::{Json, extract::State};
use shipyard_core::domain::service::ServiceState;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// GET /service
/// Current desired/running counts and utilization
pub async fn service_state(State(state): State<AppState>) -> ApiResult<Json<ServiceState>> {
    let service = state.gate.service_state().await?;
    Ok(Json(service))
}
