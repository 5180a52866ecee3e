//! Execution queue and status tracker.
//!
//! A single-consumer FIFO decouples submission from execution: `submit`
//! returns immediately with a fresh id, and one dedicated task drains the
//! queue, so at most one execution runs at a time per worker. After each
//! item the consumer sweeps terminal records older than the retention
//! window out of the live table; the history log survives independently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::{HostError, Result};
use crate::worker::engine::WorkflowEngine;
use crate::worker::history::ExecutionHistory;

/// State machine: `Queued → Running → {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One tracked execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate counters for the worker health report.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStats {
    pub active: usize,
    pub completed: usize,
    pub pending: usize,
    pub queue_size: usize,
    pub has_recent_failures: bool,
}

/// Window in which a failed execution counts as "recent" for health.
const RECENT_FAILURE_WINDOW: Duration = Duration::from_secs(600);

/// Single-consumer execution queue with per-execution status tracking.
pub struct ExecutionQueue {
    records: Mutex<HashMap<Uuid, ExecutionRecord>>,
    history: ExecutionHistory,
    tx: mpsc::UnboundedSender<(Uuid, String)>,
    retention: Duration,
}

impl ExecutionQueue {
    /// Create the queue and spawn its consumer task.
    pub fn start(engine: Arc<dyn WorkflowEngine>, config: &WorkerConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            records: Mutex::new(HashMap::new()),
            history: ExecutionHistory::new(config.history_cap),
            tx,
            retention: config.retention(),
        });

        tokio::spawn(consume(Arc::clone(&queue), engine, rx));
        queue
    }

    /// Accept workflow content for asynchronous execution.
    pub async fn submit(&self, content: String) -> Uuid {
        let id = Uuid::new_v4();
        let record = ExecutionRecord {
            id,
            status: ExecutionStatus::Queued,
            start_time: Utc::now(),
            result: None,
            error: None,
        };
        self.records.lock().await.insert(id, record);
        self.history
            .append(id, "queued", "Workflow queued for execution");
        tracing::info!(execution_id = %id, "Queued execution");

        // The consumer task holds the receiver for the queue's lifetime.
        let _ = self.tx.send((id, content));
        id
    }

    /// Current record for an execution; `NotFound` once evicted.
    pub async fn status(&self, id: Uuid) -> Result<ExecutionRecord> {
        self.records
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| HostError::NotFound {
                what: "Execution",
                id: id.to_string(),
            })
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    /// Counters for the health endpoint.
    pub async fn stats(&self) -> ExecutionStats {
        let records = self.records.lock().await;
        let active = records.len();
        let completed = records.values().filter(|r| r.status.is_terminal()).count();
        let queue_size = records
            .values()
            .filter(|r| r.status == ExecutionStatus::Queued)
            .count();
        let now = Utc::now();
        let has_recent_failures = records.values().any(|r| {
            r.status == ExecutionStatus::Failed
                && (now - r.start_time).to_std().unwrap_or_default() < RECENT_FAILURE_WINDOW
        });

        ExecutionStats {
            active,
            completed,
            pending: active - completed,
            queue_size,
            has_recent_failures,
        }
    }

    async fn transition<F>(&self, id: Uuid, f: F)
    where
        F: FnOnce(&mut ExecutionRecord),
    {
        if let Some(record) = self.records.lock().await.get_mut(&id) {
            f(record);
        }
    }

    /// Evict terminal records older than the retention window.
    async fn sweep(&self) {
        let now = Utc::now();
        let retention =
            chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::hours(1));
        self.records
            .lock()
            .await
            .retain(|_, r| !(r.status.is_terminal() && now - r.start_time > retention));
    }
}

/// Consumer loop: strictly serial, never terminated by an execution failure.
async fn consume(
    queue: Arc<ExecutionQueue>,
    engine: Arc<dyn WorkflowEngine>,
    mut rx: mpsc::UnboundedReceiver<(Uuid, String)>,
) {
    while let Some((id, content)) = rx.recv().await {
        // Evicted before we got to it; nothing to run against.
        if queue.records.lock().await.get(&id).is_none() {
            continue;
        }

        tracing::info!(execution_id = %id, "Starting execution");
        queue
            .transition(id, |r| r.status = ExecutionStatus::Running)
            .await;
        queue.history.append(
            id,
            "running",
            format!("Starting execution with {} characters", content.len()),
        );

        match engine.execute(&content).await {
            Ok(result) => {
                tracing::info!(execution_id = %id, "Execution completed");
                queue.history.append(id, "completed", "Execution completed");
                queue
                    .transition(id, |r| {
                        r.status = ExecutionStatus::Completed;
                        r.result = Some(result);
                    })
                    .await;
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(execution_id = %id, error = %message, "Execution failed");
                queue
                    .history
                    .append(id, "failed", format!("Execution failed: {}", message));
                queue
                    .transition(id, |r| {
                        r.status = ExecutionStatus::Failed;
                        r.error = Some(message);
                    })
                    .await;
            }
        }

        queue.sweep().await;
    }
}
