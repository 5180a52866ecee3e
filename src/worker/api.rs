//! HTTP surface of the in-container worker.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::HostError;
use crate::logbuf::LogBuffer;
use crate::worker::queue::ExecutionQueue;

/// Shared state for the worker API.
#[derive(Clone)]
pub struct WorkerState {
    pub queue: Arc<ExecutionQueue>,
    pub config: Arc<WorkerConfig>,
    pub logs: LogBuffer,
    pub started_at: Instant,
}

impl WorkerState {
    pub fn new(queue: Arc<ExecutionQueue>, config: WorkerConfig, logs: LogBuffer) -> Self {
        Self {
            queue,
            config: Arc::new(config),
            logs,
            started_at: Instant::now(),
        }
    }
}

/// Build the axum router for the worker surface.
pub fn router(state: WorkerState) -> Router {
    Router::new()
        .route("/execute", post(execute_workflow))
        .route("/status/{execution_id}", get(execution_status))
        .route("/health", get(health_check))
        .route("/logs", get(get_logs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    content: Option<String>,
}

async fn execute_workflow(
    State(state): State<WorkerState>,
    Json(req): Json<ExecuteRequest>,
) -> Response {
    let content = match req.content {
        Some(c) if !c.is_empty() => c,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "status": "error",
                    "error": "Missing workflow content",
                })),
            )
                .into_response();
        }
    };

    let execution_id = state.queue.submit(content).await;
    Json(serde_json::json!({
        "status": "accepted",
        "execution_id": execution_id,
        "message": "Workflow queued for execution",
    }))
    .into_response()
}

async fn execution_status(
    State(state): State<WorkerState>,
    Path(execution_id): Path<String>,
) -> Result<Json<serde_json::Value>, HostError> {
    let id = Uuid::parse_str(&execution_id).map_err(|_| HostError::NotFound {
        what: "Execution",
        id: execution_id.clone(),
    })?;

    let record = state.queue.status(id).await?;

    let mut body = serde_json::json!({
        "execution_id": record.id,
        "status": record.status,
        "start_time": record.start_time,
    });
    if let Some(result) = record.result {
        body["result"] = result;
    }
    if let Some(error) = record.error {
        body["error"] = serde_json::Value::String(error);
    }
    Ok(Json(body))
}

async fn health_check(State(state): State<WorkerState>) -> Json<serde_json::Value> {
    let stats = state.queue.stats().await;
    let uptime = state.started_at.elapsed();

    Json(serde_json::json!({
        "status": "healthy",
        "service": format!("workflow-worker-{}", state.config.artifact_id),
        "port": state.config.port,
        "executions": stats,
        "uptime_seconds": uptime.as_secs(),
    }))
}

/// Raw log text: the tracing ring buffer when it has content, otherwise
/// the rendered execution history.
async fn get_logs(State(state): State<WorkerState>) -> Response {
    let body = if !state.logs.is_empty() {
        state.logs.lines().join("\n")
    } else if !state.queue.history().is_empty() {
        state.queue.history().render_lines().join("\n")
    } else {
        format!(
            "Artifact ID: {}\nNo logs available. Container might be newly started.",
            state.config.artifact_id
        )
    };

    ([("content-type", "text/plain; charset=utf-8")], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::engine::WorkflowEngine;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    struct EchoEngine;

    #[async_trait]
    impl WorkflowEngine for EchoEngine {
        async fn execute(&self, content: &str) -> crate::error::Result<serde_json::Value> {
            Ok(serde_json::json!({"status": "success", "echo": content}))
        }
    }

    fn test_state() -> WorkerState {
        let mut config = WorkerConfig::default();
        config.artifact_id = "a1".to_string();
        let queue = ExecutionQueue::start(Arc::new(EchoEngine), &config);
        WorkerState::new(queue, config, LogBuffer::new(100))
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn execute_accepts_and_returns_id() {
        let state = test_state();
        let app = router(state.clone());

        let resp = app
            .oneshot(post_json("/execute", serde_json::json!({"content": "wf"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = json_body(resp).await;
        assert_eq!(body["status"], "accepted");
        let id: Uuid = body["execution_id"].as_str().unwrap().parse().unwrap();
        assert!(state.queue.status(id).await.is_ok());
    }

    #[tokio::test]
    async fn execute_without_content_is_400() {
        let app = router(test_state());

        let resp = app
            .oneshot(post_json("/execute", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body = json_body(resp).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "Missing workflow content");
    }

    #[tokio::test]
    async fn status_of_unknown_execution_is_404() {
        let app = router(test_state());

        let resp = app
            .oneshot(
                Request::builder()
                    .uri(format!("/status/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_reaches_terminal_with_result() {
        let state = test_state();
        let app = router(state.clone());

        let resp = app
            .clone()
            .oneshot(post_json("/execute", serde_json::json!({"content": "wf"})))
            .await
            .unwrap();
        let id = json_body(resp).await["execution_id"]
            .as_str()
            .unwrap()
            .to_string();

        // Poll until the consumer finishes the execution.
        let mut last = serde_json::Value::Null;
        for _ in 0..200 {
            let resp = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri(format!("/status/{}", id))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            last = json_body(resp).await;
            if last["status"] == "completed" || last["status"] == "failed" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert_eq!(last["status"], "completed");
        assert_eq!(last["result"]["echo"], "wf");
        assert!(last.get("error").is_none());
    }

    #[tokio::test]
    async fn health_reports_execution_stats() {
        let state = test_state();
        let app = router(state.clone());
        state.queue.submit("wf".to_string()).await;

        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = json_body(resp).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "workflow-worker-a1");
        assert!(body["executions"]["queue_size"].as_u64().is_some());
    }

    #[tokio::test]
    async fn logs_prefer_buffer_then_history() {
        let state = test_state();
        let app = router(state.clone());

        state
            .logs
            .push("2026-01-01 00:00:00  INFO worker: started".to_string());
        let resp = app
            .oneshot(Request::builder().uri("/logs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("worker: started"));
    }

    #[tokio::test]
    async fn empty_logs_fall_back_to_history() {
        let state = test_state();
        let app = router(state.clone());

        let id = state.queue.submit("wf".to_string()).await;
        let resp = app
            .oneshot(Request::builder().uri("/logs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains(&id.to_string()));
    }
}
