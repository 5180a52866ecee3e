//! Workflow execution engine capability interface.
//!
//! The queue treats the engine as a black box: content in, JSON result or
//! error out. The production implementation hands the content to an
//! external command via a scratch file.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{HostError, Result};

/// Executes workflow content and returns an opaque result payload.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn execute(&self, content: &str) -> Result<serde_json::Value>;
}

/// Engine that writes the workflow to a temp file and runs a configured
/// command on it, capturing stdout as the result payload.
pub struct ProcessEngine {
    cmd: String,
    timeout: Duration,
}

impl ProcessEngine {
    pub fn new(cmd: impl Into<String>, timeout: Duration) -> Self {
        Self {
            cmd: cmd.into(),
            timeout,
        }
    }
}

#[async_trait]
impl WorkflowEngine for ProcessEngine {
    async fn execute(&self, content: &str) -> Result<serde_json::Value> {
        use std::io::Write;

        // The scratch file is deleted when `file` drops, error paths included.
        let mut file = tempfile::Builder::new()
            .prefix("workflow-")
            .suffix(".act")
            .tempfile()?;
        file.write_all(content.as_bytes())?;
        file.flush()?;

        tracing::debug!(path = %file.path().display(), "Wrote workflow scratch file");

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.cmd).arg(file.path()).output(),
        )
        .await
        .map_err(|_| HostError::Engine {
            reason: format!("engine timed out after {:?}", self.timeout),
        })?
        .map_err(|e| HostError::Engine {
            reason: format!("failed to spawn {}: {}", self.cmd, e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HostError::Engine {
                reason: format!(
                    "engine exited with {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        // Engines that emit JSON get passed through; plain text is wrapped.
        let payload = serde_json::from_str(&stdout).unwrap_or_else(|_| {
            serde_json::json!({
                "status": "success",
                "output": stdout,
            })
        });
        Ok(payload)
    }
}
