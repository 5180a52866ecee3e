//! Host port allocation for worker containers.

use std::collections::BTreeMap;

use tokio::sync::Mutex;

use crate::error::{HostError, Result};

/// Hands out unique host ports from a bounded range and tracks which
/// artifact occupies each one.
///
/// Allocation and table insertion are a single step under the lock, so two
/// concurrent start requests can never be issued the same port.
pub struct PortAllocator {
    base: u16,
    max: u16,
    table: Mutex<BTreeMap<u16, String>>,
}

impl PortAllocator {
    pub fn new(base: u16, max: u16) -> Self {
        Self {
            base,
            max,
            table: Mutex::new(BTreeMap::new()),
        }
    }

    /// Reserve the lowest free port in the range for `artifact_id`.
    pub async fn allocate(&self, artifact_id: &str) -> Result<u16> {
        let mut table = self.table.lock().await;
        for port in self.base..=self.max {
            if !table.contains_key(&port) {
                table.insert(port, artifact_id.to_string());
                return Ok(port);
            }
        }
        Err(HostError::ResourceExhausted {
            reason: format!("no free port in {}-{}", self.base, self.max),
        })
    }

    /// Record that `artifact_id` holds `port`, regardless of range.
    ///
    /// Used when the runtime reports a bound host port that differs from
    /// the requested candidate.
    pub async fn claim(&self, port: u16, artifact_id: &str) {
        self.table
            .lock()
            .await
            .insert(port, artifact_id.to_string());
    }

    /// Release a port. Releasing an unheld port is a no-op.
    pub async fn release(&self, port: u16) {
        self.table.lock().await.remove(&port);
    }

    /// Artifact currently holding a port, if any.
    pub async fn owner(&self, port: u16) -> Option<String> {
        self.table.lock().await.get(&port).cloned()
    }

    /// Number of ports currently reserved.
    pub async fn in_use(&self) -> usize {
        self.table.lock().await.len()
    }
}
