//! Health reconciliation: Docker-level state merged with the worker's own
//! liveness report.
//!
//! The runtime is inspected first; only if Docker says the container is
//! running does the reconciler probe the worker's `/health` endpoint. A
//! failing probe marks the record as errored but never deletes it, since
//! the container may still be running. Only a container the runtime no
//! longer knows gets purged.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::error::{HostError, Result};
use crate::manager::lifecycle::{ContainerManager, ContainerStatus};
use crate::runtime::RuntimeState;

/// Workers publish on the host loopback via their bound port.
const WORKER_HOST: &str = "127.0.0.1";

/// Unified health verdict for an artifact's container.
#[derive(Debug, Clone, Serialize)]
pub struct HealthView {
    pub status: ContainerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<RuntimeState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthView {
    fn stopped() -> Self {
        Self {
            status: ContainerStatus::Stopped,
            state: None,
            worker: None,
            error: None,
        }
    }
}

/// Probes container and worker health and corrects tracked state to match.
pub struct HealthReconciler {
    manager: Arc<ContainerManager>,
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl HealthReconciler {
    pub fn new(manager: Arc<ContainerManager>) -> Self {
        let probe_timeout = manager.config().health_timeout();
        Self {
            manager,
            client: reqwest::Client::new(),
            probe_timeout,
        }
    }

    /// Reconcile and report the health of an artifact's container.
    pub async fn check(&self, artifact_id: &str) -> Result<HealthView> {
        let gate = self.manager.gate(artifact_id).await;
        let _guard = gate.lock().await;

        let record = match self.manager.record(artifact_id).await {
            Some(r) => r,
            None => return Ok(HealthView::stopped()),
        };

        let state = match self.manager.runtime().inspect(&record.container_id).await {
            Ok(state) => state,
            Err(HostError::NotFound { .. }) => {
                // Externally removed: self-heal rather than error.
                self.manager.purge(artifact_id).await;
                return Ok(HealthView::stopped());
            }
            Err(e) => return Err(e),
        };

        if !state.running {
            self.manager
                .update_record(artifact_id, |r| {
                    r.status = ContainerStatus::Stopped;
                    r.health_status = "stopped".to_string();
                    r.last_health_check = Some(Utc::now());
                })
                .await;
            return Ok(HealthView {
                status: ContainerStatus::Stopped,
                state: Some(state),
                worker: None,
                error: None,
            });
        }

        // Docker says running; ask the worker itself.
        let url = format!("http://{}:{}/health", WORKER_HOST, record.port);
        match self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                let worker: serde_json::Value =
                    resp.json().await.unwrap_or(serde_json::Value::Null);
                let reported = worker
                    .get("status")
                    .and_then(|v| v.as_str())
                    .unwrap_or("healthy")
                    .to_string();
                self.manager
                    .update_record(artifact_id, |r| {
                        r.status = ContainerStatus::Running;
                        r.health_status = reported;
                        r.last_error = None;
                        r.last_health_check = Some(Utc::now());
                    })
                    .await;
                Ok(HealthView {
                    status: ContainerStatus::Running,
                    state: Some(state),
                    worker: Some(worker),
                    error: None,
                })
            }
            Ok(resp) => {
                let detail = format!("worker health probe returned {}", resp.status());
                self.manager
                    .update_record(artifact_id, |r| {
                        r.status = ContainerStatus::Error;
                        r.health_status = "error".to_string();
                        r.last_error = Some(detail.clone());
                        r.last_health_check = Some(Utc::now());
                    })
                    .await;
                Ok(HealthView {
                    status: ContainerStatus::Error,
                    state: Some(state),
                    worker: None,
                    error: Some(detail),
                })
            }
            Err(e) => {
                let detail = format!("worker health probe unreachable: {}", e);
                self.manager
                    .update_record(artifact_id, |r| {
                        r.status = ContainerStatus::Error;
                        r.health_status = "unreachable".to_string();
                        r.last_error = Some(detail.clone());
                        r.last_health_check = Some(Utc::now());
                    })
                    .await;
                Ok(HealthView {
                    status: ContainerStatus::Error,
                    state: Some(state),
                    worker: None,
                    error: Some(detail),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use crate::runtime::fake::FakeRuntime;

    fn manager_on_range(runtime: Arc<FakeRuntime>, base: u16, max: u16) -> Arc<ContainerManager> {
        let mut config = ManagerConfig::default();
        config.base_port = base;
        config.max_port = max;
        config.health_timeout_secs = 1;
        Arc::new(ContainerManager::new(config, runtime))
    }

    #[tokio::test]
    async fn untracked_artifact_is_stopped() {
        let mgr = manager_on_range(Arc::new(FakeRuntime::new()), 5002, 5050);
        let reconciler = HealthReconciler::new(mgr);

        let view = reconciler.check("nope").await.unwrap();
        assert_eq!(view.status, ContainerStatus::Stopped);
    }

    #[tokio::test]
    async fn externally_removed_container_purges_record() {
        let runtime = Arc::new(FakeRuntime::new());
        let mgr = manager_on_range(Arc::clone(&runtime), 5002, 5050);
        let reconciler = HealthReconciler::new(Arc::clone(&mgr));

        mgr.start("a1").await.unwrap();
        runtime.remove_externally("workflow-a1");

        let view = reconciler.check("a1").await.unwrap();
        assert_eq!(view.status, ContainerStatus::Stopped);
        assert!(mgr.record("a1").await.is_none());
    }

    #[tokio::test]
    async fn exited_container_reports_stopped_but_keeps_record() {
        let runtime = Arc::new(FakeRuntime::new());
        let mgr = manager_on_range(Arc::clone(&runtime), 5002, 5050);
        let reconciler = HealthReconciler::new(Arc::clone(&mgr));

        mgr.start("a1").await.unwrap();
        runtime.mark_exited("workflow-a1");

        let view = reconciler.check("a1").await.unwrap();
        assert_eq!(view.status, ContainerStatus::Stopped);
        let record = mgr.record("a1").await.unwrap();
        assert_eq!(record.status, ContainerStatus::Stopped);
    }

    #[tokio::test]
    async fn unreachable_worker_marks_error_and_keeps_record() {
        let runtime = Arc::new(FakeRuntime::new());
        // Nothing listens on this port, so the probe fails at the network
        // level while Docker still reports running.
        let mgr = manager_on_range(Arc::clone(&runtime), 59784, 59784);
        let reconciler = HealthReconciler::new(Arc::clone(&mgr));

        mgr.start("a1").await.unwrap();
        let view = reconciler.check("a1").await.unwrap();
        assert_eq!(view.status, ContainerStatus::Error);
        assert!(view.error.is_some());

        let record = mgr.record("a1").await.unwrap();
        assert_eq!(record.status, ContainerStatus::Error);
        assert_eq!(record.health_status, "unreachable");
        assert!(record.last_error.is_some());
    }

    #[tokio::test]
    async fn healthy_worker_merges_views_and_clears_error() {
        use axum::routing::get;
        use axum::{Json, Router};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let app = Router::new().route(
            "/health",
            get(|| async { Json(serde_json::json!({"status": "healthy"})) }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let runtime = Arc::new(FakeRuntime::new());
        let mgr = manager_on_range(Arc::clone(&runtime), port, port);
        let reconciler = HealthReconciler::new(Arc::clone(&mgr));

        mgr.start("a1").await.unwrap();
        // Seed an error so the healthy probe has something to clear.
        mgr.update_record("a1", |r| {
            r.last_error = Some("old failure".to_string());
        })
        .await;

        let view = reconciler.check("a1").await.unwrap();
        assert_eq!(view.status, ContainerStatus::Running);
        assert!(view.worker.is_some());

        let record = mgr.record("a1").await.unwrap();
        assert_eq!(record.status, ContainerStatus::Running);
        assert_eq!(record.health_status, "healthy");
        assert!(record.last_error.is_none());
        assert!(record.last_health_check.is_some());
    }
}
