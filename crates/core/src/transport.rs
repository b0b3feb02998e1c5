use thiserror::Error;

use crate::descriptor::TaskDescriptor;

/// Outbound RPC surface the worker pool needs against a worker's
/// netloc. Kept as a trait so the lazy/worker pool core stays free of
/// any particular HTTP client or async runtime; `master-server` wires
/// in the real `reqwest::blocking` implementation (see DESIGN.md).
pub trait WorkerTransport: Send + Sync {
    fn assign(&self, netloc: &str, descriptor: &TaskDescriptor) -> Result<(), TransportError>;
    fn abort(&self, netloc: &str, task_id: &str) -> Result<(), TransportError>;
    fn health_check(&self, netloc: &str) -> Result<(), TransportError>;

    /// Best-effort shutdown notification (§6 "Kill"). No `Result`: the
    /// caller is already tearing down and has nothing useful to do with
    /// a failure beyond logging it, which implementations do themselves.
    fn kill(&self, netloc: &str);
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("worker did not respond: {0}")]
    Unreachable(String),

    #[error("worker rejected the request with status {0}")]
    Rejected(u16),
}

/// A transport that always fails, useful as a placeholder before the
/// real HTTP client is wired in, and in unit tests that only exercise
/// the local queueing/state-machine logic.
pub struct UnreachableTransport;

impl WorkerTransport for UnreachableTransport {
    fn assign(&self, _netloc: &str, _descriptor: &TaskDescriptor) -> Result<(), TransportError> {
        Err(TransportError::Unreachable("no transport configured".into()))
    }

    fn abort(&self, _netloc: &str, _task_id: &str) -> Result<(), TransportError> {
        Err(TransportError::Unreachable("no transport configured".into()))
    }

    fn health_check(&self, _netloc: &str) -> Result<(), TransportError> {
        Err(TransportError::Unreachable("no transport configured".into()))
    }

    fn kill(&self, _netloc: &str) {}
}
