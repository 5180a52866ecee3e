//! Container runtime capability interface.
//!
//! The manager only ever talks to the runtime through [`ContainerRuntime`],
//! so tests can substitute a scripted fake and the bollard implementation
//! stays confined to [`docker`].

pub mod docker;

#[cfg(test)]
pub mod fake;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{HostError, Result};

pub use docker::{connect_docker, DockerRuntime};

/// Snapshot of a container's state as reported by the runtime.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeState {
    pub running: bool,
    pub paused: bool,
    pub restarting: bool,
    pub exit_code: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Host port actually bound by the runtime, if a mapping exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
}

/// CPU and memory usage derived from two consecutive usage samples.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceStats {
    pub cpu_percent: f64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
}

/// Everything the manager needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check that the runtime daemon is reachable.
    async fn ping(&self) -> Result<()>;

    /// Create and start a container, binding `internal_port` in the
    /// container to `host_port` on the host. Returns the container id.
    async fn create_and_start(
        &self,
        name: &str,
        image: &str,
        env: HashMap<String, String>,
        internal_port: u16,
        host_port: u16,
    ) -> Result<String>;

    /// Stop a container with a grace period in seconds.
    async fn stop(&self, id: &str, timeout_secs: i64) -> Result<()>;

    /// Remove a container by id or name.
    async fn remove(&self, id_or_name: &str, force: bool) -> Result<()>;

    /// Inspect a container. `NotFound` means the runtime no longer knows it.
    async fn inspect(&self, id: &str) -> Result<RuntimeState>;

    /// Fetch the last `tail` lines of stdout+stderr, no timestamps.
    async fn logs(&self, id: &str, tail: usize) -> Result<String>;

    /// Sample resource usage twice and derive CPU/memory figures.
    async fn stats(&self, id: &str) -> Result<ResourceStats>;
}

/// Stand-in used when no Docker daemon is reachable at startup. The
/// manager keeps serving its API; every container operation reports the
/// missing runtime instead of crashing the process.
pub struct UnavailableRuntime {
    reason: String,
}

impl UnavailableRuntime {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn unavailable(&self) -> HostError {
        HostError::Config {
            reason: format!("container runtime unavailable: {}", self.reason),
        }
    }
}

#[async_trait]
impl ContainerRuntime for UnavailableRuntime {
    async fn ping(&self) -> Result<()> {
        Err(self.unavailable())
    }

    async fn create_and_start(
        &self,
        _name: &str,
        _image: &str,
        _env: HashMap<String, String>,
        _internal_port: u16,
        _host_port: u16,
    ) -> Result<String> {
        Err(self.unavailable())
    }

    async fn stop(&self, _id: &str, _timeout_secs: i64) -> Result<()> {
        Err(self.unavailable())
    }

    async fn remove(&self, _id_or_name: &str, _force: bool) -> Result<()> {
        Err(self.unavailable())
    }

    async fn inspect(&self, _id: &str) -> Result<RuntimeState> {
        Err(self.unavailable())
    }

    async fn logs(&self, _id: &str, _tail: usize) -> Result<String> {
        Err(self.unavailable())
    }

    async fn stats(&self, _id: &str) -> Result<ResourceStats> {
        Err(self.unavailable())
    }
}
