//! Registry webhook handler

use axum::{Json, extract::State, http::StatusCode};
use shipyard_core::domain::image::ImageReference;
use shipyard_core::dto::registry::{PushNotification, PushResponse};

use crate::api::AppState;
use crate::api::error::ApiResult;

/// POST /registry/push
/// Push notification from the registry
///
/// Returns 202 when a run was queued and 200 when the tag is not watched.
pub async fn push(
    State(state): State<AppState>,
    Json(req): Json<PushNotification>,
) -> ApiResult<(StatusCode, Json<PushResponse>)> {
    tracing::info!("Push notification for {}:{}", req.repository, req.tag);

    let image = ImageReference::from(req);

    if !state.watcher.is_watched(&image)? {
        return Ok((
            StatusCode::OK,
            Json(PushResponse {
                accepted: false,
                ignored: true,
            }),
        ));
    }

    // The simulated registry only knows images it was told about
    if let Some(registry) = &state.simulated_registry {
        registry.seed(image.clone());
    }

    let accepted = state.watcher.on_push(image)?.is_some();
    Ok((
        StatusCode::ACCEPTED,
        Json(PushResponse {
            accepted,
            ignored: !accepted,
        }),
    ))
}
