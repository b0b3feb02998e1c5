use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;
use thiserror::Error;

use crate::reference::Reference;

/// Reasons a worker may report a task as failed, carried on the
/// `task_failed` path and mirrored in the journal and over the wire.
#[derive(Debug, Clone, Error)]
pub enum TaskFailureReason {
    #[error("worker executing the task was lost")]
    WorkerFailed,

    /// `detail` names the concrete reference the task could not fetch;
    /// its location hints are the endpoints to blacklist. A missing or
    /// non-Concrete detail is treated as an empty blacklist (see Open
    /// Question (b) in DESIGN.md).
    #[error("task reported a missing input")]
    MissingInput { detail: Option<Reference> },

    #[error("task raised a runtime exception: {0}")]
    RuntimeException(String),
}

/// Control-plane errors, surfaced directly to HTTP callers; they never
/// alter task or job state.
#[derive(Debug, Clone, Error)]
pub enum ControlError {
    #[error("too many concurrent waiters")]
    TooManyWaiters,

    #[error("server is stopping")]
    ServerStopping,
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = match self {
            ControlError::TooManyWaiters => StatusCode::SERVICE_UNAVAILABLE,
            ControlError::ServerStopping => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}
