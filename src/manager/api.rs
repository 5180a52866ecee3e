//! HTTP surface of the manager.
//!
//! Thin request parsing and JSON marshaling over the lifecycle manager,
//! health reconciler, and execution proxy.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::HostError;
use crate::manager::health::{HealthReconciler, HealthView};
use crate::manager::lifecycle::ContainerManager;
use crate::manager::proxy::ExecutionProxy;

/// Shared state for the manager API.
#[derive(Clone)]
pub struct ManagerState {
    pub manager: Arc<ContainerManager>,
    pub health: Arc<HealthReconciler>,
    pub proxy: Arc<ExecutionProxy>,
}

impl ManagerState {
    pub fn new(manager: Arc<ContainerManager>) -> Self {
        let health = Arc::new(HealthReconciler::new(Arc::clone(&manager)));
        let proxy = Arc::new(ExecutionProxy::new(
            Arc::clone(&manager),
            Arc::clone(&health),
        ));
        Self {
            manager,
            health,
            proxy,
        }
    }
}

/// Build the axum router for the manager surface.
pub fn router(state: ManagerState) -> Router {
    Router::new()
        .route("/health", get(service_health))
        .route("/container/start", post(start_container))
        .route("/container/stop", post(stop_container))
        .route("/container/health", post(container_health))
        .route("/container/execute", post(execute_workflow))
        .route("/container/logs/{artifact_id}", get(container_logs))
        .route("/container/state/{artifact_id}", get(container_state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ArtifactRequest {
    #[serde(rename = "artifactId")]
    artifact_id: String,
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    #[serde(rename = "artifactId")]
    artifact_id: String,
    content: String,
}

async fn service_health(State(state): State<ManagerState>) -> Response {
    match state.manager.runtime().ping().await {
        Ok(()) => Json(serde_json::json!({
            "status": "healthy",
            "service": "flowhost",
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            })),
        )
            .into_response(),
    }
}

async fn start_container(
    State(state): State<ManagerState>,
    Json(req): Json<ArtifactRequest>,
) -> Result<Json<serde_json::Value>, HostError> {
    let (container_id, port) = state.manager.start(&req.artifact_id).await?;
    Ok(Json(serde_json::json!({
        "status": "success",
        "containerId": container_id,
        "port": port,
    })))
}

async fn stop_container(
    State(state): State<ManagerState>,
    Json(req): Json<ArtifactRequest>,
) -> Result<Json<serde_json::Value>, HostError> {
    state.manager.stop(&req.artifact_id).await?;
    Ok(Json(serde_json::json!({ "status": "success" })))
}

async fn container_health(
    State(state): State<ManagerState>,
    Json(req): Json<ArtifactRequest>,
) -> Result<Json<HealthView>, HostError> {
    let view = state.health.check(&req.artifact_id).await?;
    Ok(Json(view))
}

async fn execute_workflow(
    State(state): State<ManagerState>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<serde_json::Value>, HostError> {
    let accepted = state.proxy.execute(&req.artifact_id, &req.content).await?;
    Ok(Json(accepted))
}

async fn container_logs(
    State(state): State<ManagerState>,
    Path(artifact_id): Path<String>,
) -> Result<String, HostError> {
    let record = state
        .manager
        .record(&artifact_id)
        .await
        .ok_or_else(|| HostError::NotFound {
            what: "Container",
            id: artifact_id.clone(),
        })?;

    state.manager.runtime().logs(&record.container_id, 1000).await
}

async fn container_state(
    State(state): State<ManagerState>,
    Path(artifact_id): Path<String>,
) -> Result<Json<serde_json::Value>, HostError> {
    let record = state
        .manager
        .record(&artifact_id)
        .await
        .ok_or_else(|| HostError::NotFound {
            what: "Container",
            id: artifact_id.clone(),
        })?;

    let runtime = state.manager.runtime();
    let inspect = runtime.inspect(&record.container_id).await?;

    // Tail and stats are best-effort extras on this view.
    let tail = runtime
        .logs(&record.container_id, 10)
        .await
        .unwrap_or_default();
    let stats = runtime.stats(&record.container_id).await.ok();

    Ok(Json(serde_json::json!({
        "state": inspect,
        "logs_tail": tail,
        "stats": stats,
        "record": record,
    })))
}
