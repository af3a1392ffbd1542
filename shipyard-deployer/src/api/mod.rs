//! API Module
//!
//! HTTP status API for the deployer, plus the registry push webhook.

pub mod error;
pub mod health;
pub mod registry;
pub mod runs;
pub mod service;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::backend::memory::MemoryRegistry;
use crate::controller::PipelineController;
use crate::gate::ServiceGate;
use crate::watcher::RegistryWatcher;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<PipelineController>,
    pub watcher: Arc<RegistryWatcher>,
    pub gate: Arc<ServiceGate>,
    pub simulated_registry: Option<Arc<MemoryRegistry>>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Run endpoints
        .route("/runs", get(runs::list_runs))
        .route("/runs/abort", post(runs::abort_run))
        .route("/runs/{id}", get(runs::get_run))
        // Registry webhook
        .route("/registry/push", post(registry::push))
        // Managed service
        .route("/service", get(service::service_state))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryCluster;
    use crate::controller::{ControllerSettings, RunHistory, RunQueue};
    use crate::deploy::{DeployOrchestrator, DeploySettings};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        controller: Arc<PipelineController>,
        queue: Arc<RunQueue>,
        registry: Arc<MemoryRegistry>,
    }

    fn app() -> TestApp {
        let registry = Arc::new(MemoryRegistry::new());
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_service("svc", "web", "myrepo:v1", 2);
        let gate = Arc::new(ServiceGate::new("svc", cluster));
        let queue = Arc::new(RunQueue::new());

        let controller = Arc::new(PipelineController::new(
            ControllerSettings {
                registry_host: None,
                container_name: "web".to_string(),
                source_timeout: Duration::from_secs(5),
                build_timeout: Duration::from_secs(5),
                deploy_timeout: Duration::from_secs(30),
            },
            registry.clone(),
            Arc::clone(&gate),
            DeployOrchestrator::new(DeploySettings {
                minimum_healthy_percent: 100,
                maximum_percent: 200,
                rollback_threshold: 2,
                health_check_timeout: Duration::from_secs(5),
                health_check_interval: Duration::from_millis(5),
            }),
            Arc::clone(&queue),
            Arc::new(RunHistory::default()),
        ));
        let watcher = Arc::new(RegistryWatcher::new("myrepo", "latest", Arc::clone(&queue)));

        let router = create_router(AppState {
            controller: Arc::clone(&controller),
            watcher,
            gate,
            simulated_registry: Some(registry.clone()),
        });

        TestApp {
            router,
            controller,
            queue,
            registry,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn push(repository: &str, tag: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/registry/push")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({ "repository": repository, "tag": tag }).to_string(),
            ))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_push_outcomes() {
        let app = app();

        let (status, body) = send(&app.router, push("myrepo", "latest")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["accepted"], true);
        assert_eq!(app.queue.len(), 1);

        let (status, body) = send(&app.router, push("myrepo", "dev")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ignored"], true);

        let (status, _) = send(&app.router, push("otherrepo", "latest")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&app.router, push("", "latest")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("malformed"));

        assert_eq!(app.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_only_accepted_pushes_reach_simulated_registry() {
        use shipyard_core::collaborator::Registry;
        use shipyard_core::domain::image::ImageReference;

        let app = app();

        send(&app.router, push("otherrepo", "latest")).await;
        send(&app.router, push("myrepo", "dev")).await;
        send(&app.router, push("myrepo", "latest")).await;

        let exists = |repository: &str, tag: &str| {
            let image = ImageReference::new(repository, tag);
            let registry = Arc::clone(&app.registry);
            async move { registry.image_exists(&image).await.unwrap() }
        };
        assert!(!exists("otherrepo", "latest").await);
        assert!(!exists("myrepo", "dev").await);
        assert!(exists("myrepo", "latest").await);
    }

    #[tokio::test]
    async fn test_runs_are_listed_after_execution() {
        let app = app();

        let (status, _) = send(&app.router, push("myrepo", "latest")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let trigger = app.queue.next().await;
        app.controller.execute(trigger).await;

        let (status, body) = send(&app.router, get("/runs")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], 1);
        assert_eq!(body[0]["status"], "Succeeded");

        let (status, body) = send(&app.router, get("/runs/1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transitions"].as_array().unwrap().len(), 5);

        let (status, _) = send(&app.router, get("/runs/42")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_abort_without_run_is_not_found() {
        let app = app();

        let request = Request::builder()
            .method("POST")
            .uri("/runs/abort")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "No run in progress");
    }

    #[tokio::test]
    async fn test_service_state() {
        let app = app();

        let (status, body) = send(&app.router, get("/service")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["desired_count"], 2);
        assert_eq!(body["running_count"], 2);
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let response = app.router.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
