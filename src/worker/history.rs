//! Bounded append-only record of execution status transitions.
//!
//! Kept separate from the live execution table so recently completed work
//! stays inspectable after the retention sweep evicts its record. The
//! global bound is counted in executions, oldest evicted first.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One status transition for an execution.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub message: String,
}

/// Append-only history log, bounded to the most recent executions.
pub struct ExecutionHistory {
    inner: Mutex<HistoryInner>,
    cap: usize,
}

#[derive(Default)]
struct HistoryInner {
    entries: HashMap<Uuid, Vec<HistoryEntry>>,
    /// Execution ids in first-seen order, for oldest-first eviction.
    order: VecDeque<Uuid>,
}

impl ExecutionHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Mutex::new(HistoryInner::default()),
            cap,
        }
    }

    /// Append a transition for an execution, evicting the oldest tracked
    /// execution when the cap is exceeded.
    pub fn append(&self, execution_id: Uuid, status: &str, message: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();

        if !inner.entries.contains_key(&execution_id) {
            inner.order.push_back(execution_id);
            while inner.order.len() > self.cap {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.entries.remove(&oldest);
                }
            }
        }

        inner
            .entries
            .entry(execution_id)
            .or_default()
            .push(HistoryEntry {
                timestamp: Utc::now(),
                status: status.to_string(),
                message: message.into(),
            });
    }

    /// Ordered transitions for one execution, if still retained.
    pub fn get(&self, execution_id: Uuid) -> Option<Vec<HistoryEntry>> {
        self.inner.lock().unwrap().entries.get(&execution_id).cloned()
    }

    /// Number of executions currently retained.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All retained transitions rendered as log lines, oldest execution
    /// first. Used as the `/logs` fallback.
    pub fn render_lines(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut lines = Vec::new();
        for id in &inner.order {
            if let Some(entries) = inner.entries.get(id) {
                for e in entries {
                    lines.push(format!(
                        "{} - Execution {} - {} - {}",
                        e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        id,
                        e.status,
                        e.message
                    ));
                }
            }
        }
        lines
    }
}
