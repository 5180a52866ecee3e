//! Environment-driven configuration for both binaries.
//!
//! Values come from the environment (a `.env` file is loaded first by the
//! entrypoints); every field has a working default so `flowhost` runs with
//! no configuration at all.

use std::time::Duration;

use clap::Parser;

/// Configuration for the manager process.
#[derive(Debug, Clone, Parser)]
#[command(name = "flowhost", about = "Workflow container control plane")]
pub struct ManagerConfig {
    /// Port the manager API listens on.
    #[arg(long, env = "FLOWHOST_PORT", default_value_t = 5001)]
    pub listen_port: u16,

    /// Docker image for worker containers.
    #[arg(long, env = "FLOWHOST_WORKER_IMAGE", default_value = "flowhost-worker:latest")]
    pub worker_image: String,

    /// First host port handed out to worker containers.
    #[arg(long, env = "FLOWHOST_BASE_PORT", default_value_t = 5002)]
    pub base_port: u16,

    /// Last host port handed out to worker containers.
    #[arg(long, env = "FLOWHOST_MAX_PORT", default_value_t = 5050)]
    pub max_port: u16,

    /// How many candidate ports to try before giving up on a start request.
    #[arg(long, env = "FLOWHOST_MAX_START_ATTEMPTS", default_value_t = 10)]
    pub max_start_attempts: u32,

    /// Health probe timeout in seconds.
    #[arg(long, env = "FLOWHOST_HEALTH_TIMEOUT_SECS", default_value_t = 2)]
    pub health_timeout_secs: u64,

    /// Proxied execute timeout in seconds.
    #[arg(long, env = "FLOWHOST_EXECUTE_TIMEOUT_SECS", default_value_t = 5)]
    pub execute_timeout_secs: u64,

    /// Grace period when stopping a container, in seconds.
    #[arg(long, env = "FLOWHOST_STOP_TIMEOUT_SECS", default_value_t = 10)]
    pub stop_timeout_secs: u64,
}

impl ManagerConfig {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_secs(self.execute_timeout_secs)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::parse_from(["flowhost"])
    }
}

/// Configuration for the worker process running inside a container.
#[derive(Debug, Clone, Parser)]
#[command(name = "flowhost-worker", about = "In-container workflow worker")]
pub struct WorkerConfig {
    /// Port assigned by the manager at container creation.
    #[arg(long, env = "PORT", default_value_t = 5002)]
    pub port: u16,

    /// Artifact this worker executes workflows for.
    #[arg(long, env = "ARTIFACT_ID", default_value = "")]
    pub artifact_id: String,

    /// Command invoked on the workflow file by the process engine.
    #[arg(long, env = "FLOWHOST_ENGINE_CMD", default_value = "act-run")]
    pub engine_cmd: String,

    /// Engine execution timeout in seconds.
    #[arg(long, env = "FLOWHOST_ENGINE_TIMEOUT_SECS", default_value_t = 300)]
    pub engine_timeout_secs: u64,

    /// Seconds a terminal execution stays in the live table before eviction.
    #[arg(long, env = "FLOWHOST_RETENTION_SECS", default_value_t = 3600)]
    pub retention_secs: u64,

    /// Most recent executions kept in the history log.
    #[arg(long, env = "FLOWHOST_HISTORY_CAP", default_value_t = 20)]
    pub history_cap: usize,
}

impl WorkerConfig {
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::parse_from(["flowhost-worker"])
    }
}

/// Deterministic container name for an artifact.
pub fn container_name(artifact_id: &str) -> String {
    format!("workflow-{}", artifact_id)
}
