//! Error types shared by the manager and the worker.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Errors that can occur while managing containers or executions.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Unknown artifact or execution id.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// Operation attempted on a container not in the required state.
    #[error("container for {artifact_id} is {state}, not running")]
    InvalidState { artifact_id: String, state: String },

    /// No free port left in the configured range, or the start attempt
    /// budget was exhausted.
    #[error("resources exhausted: {reason}")]
    ResourceExhausted { reason: String },

    /// Container runtime call failed for a reason other than a port conflict.
    #[error("runtime error: {reason}")]
    Runtime { reason: String },

    /// Docker API error.
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Forwarding a request to a worker failed at the network level.
    #[error("proxy error: {reason}")]
    Proxy { reason: String },

    /// The worker received the request but rejected it.
    #[error("worker rejected request ({status}): {body}")]
    Worker { status: u16, body: String },

    /// Runtime client unavailable or misconfigured at startup.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// Workflow engine failure inside the worker.
    #[error("engine error: {reason}")]
    Engine { reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// HTTP status code for the error envelope.
    ///
    /// `InvalidState` maps to 400 so a caller can tell "no container" apart
    /// from a manager-side failure; everything runtime-ish maps to 500, and
    /// worker forwarding failures to 502.
    pub fn status_code(&self) -> StatusCode {
        match self {
            HostError::NotFound { .. } => StatusCode::NOT_FOUND,
            HostError::InvalidState { .. } => StatusCode::BAD_REQUEST,
            HostError::Proxy { .. } | HostError::Worker { .. } => StatusCode::BAD_GATEWAY,
            HostError::ResourceExhausted { .. }
            | HostError::Runtime { .. }
            | HostError::Docker(_)
            | HostError::Config { .. }
            | HostError::Engine { .. }
            | HostError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True when a container-create failure means "this host port is taken"
    /// and the caller should retry with the next candidate port.
    pub fn is_port_conflict(&self) -> bool {
        let msg = match self {
            HostError::Docker(e) => e.to_string(),
            HostError::Runtime { reason } => reason.clone(),
            _ => return false,
        };
        let msg = msg.to_lowercase();
        msg.contains("port is already allocated") || msg.contains("address already in use")
    }
}

impl IntoResponse for HostError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "status": "error",
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// Result type for flowhost operations.
pub type Result<T> = std::result::Result<T, HostError>;
