//! Forwards execution requests to the worker inside an artifact's container.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{HostError, Result};
use crate::manager::health::HealthReconciler;
use crate::manager::lifecycle::{ContainerManager, ContainerStatus};

const WORKER_HOST: &str = "127.0.0.1";

/// Proxies execute requests to a worker over HTTP.
///
/// The proxy does not wait for the execution to finish; it returns the
/// worker's acceptance payload (execution id) unmodified.
pub struct ExecutionProxy {
    manager: Arc<ContainerManager>,
    health: Arc<HealthReconciler>,
    client: reqwest::Client,
    execute_timeout: Duration,
}

impl ExecutionProxy {
    pub fn new(manager: Arc<ContainerManager>, health: Arc<HealthReconciler>) -> Self {
        let execute_timeout = manager.config().execute_timeout();
        Self {
            manager,
            health,
            client: reqwest::Client::new(),
            execute_timeout,
        }
    }

    /// Forward workflow content to the artifact's worker.
    pub async fn execute(&self, artifact_id: &str, content: &str) -> Result<serde_json::Value> {
        let record = self
            .manager
            .record(artifact_id)
            .await
            .ok_or_else(|| HostError::NotFound {
                what: "Container",
                id: artifact_id.to_string(),
            })?;

        if record.status != ContainerStatus::Running {
            return Err(HostError::InvalidState {
                artifact_id: artifact_id.to_string(),
                state: record.status.to_string(),
            });
        }

        // Advisory pre-check: log a sick worker but forward anyway. The
        // worker's own response is the authoritative answer.
        match self.health.check(artifact_id).await {
            Ok(view) if view.status != ContainerStatus::Running => {
                tracing::warn!(
                    artifact_id = %artifact_id,
                    status = %view.status,
                    "Health pre-check failed, forwarding anyway"
                );
            }
            Err(e) => {
                tracing::warn!(
                    artifact_id = %artifact_id,
                    error = %e,
                    "Health pre-check errored, forwarding anyway"
                );
            }
            Ok(_) => {}
        }

        let url = format!("http://{}:{}/execute", WORKER_HOST, record.port);
        let resp = self
            .client
            .post(&url)
            .timeout(self.execute_timeout)
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .map_err(|e| HostError::Proxy {
                reason: format!("failed to reach worker for {}: {}", artifact_id, e),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HostError::Worker {
                status: status.as_u16(),
                body,
            });
        }

        resp.json().await.map_err(|e| HostError::Proxy {
            reason: format!("invalid worker response: {}", e),
        })
    }
}
