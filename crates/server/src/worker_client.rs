//! The outbound half of §6: the three RPCs the master issues to a
//! worker's netloc. Built on `reqwest::blocking` rather than the async
//! client so the dispatcher and reaper threads -- plain `std::thread`s,
//! not tokio tasks -- can call it directly without an executor.

use std::time::Duration;

use master_core::prelude::{TaskDescriptor, TransportError, WorkerTransport};

pub struct ReqwestWorkerTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestWorkerTransport {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self { client }
    }
}

impl Default for ReqwestWorkerTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerTransport for ReqwestWorkerTransport {
    fn assign(&self, netloc: &str, descriptor: &TaskDescriptor) -> Result<(), TransportError> {
        let url = format!("http://{netloc}/task/");
        let response = self
            .client
            .post(&url)
            .json(descriptor)
            .send()
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Rejected(response.status().as_u16()))
        }
    }

    fn abort(&self, netloc: &str, task_id: &str) -> Result<(), TransportError> {
        let url = format!("http://{netloc}/task/{task_id}/abort");
        let response = self
            .client
            .post(&url)
            .send()
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Rejected(response.status().as_u16()))
        }
    }

    fn health_check(&self, netloc: &str) -> Result<(), TransportError> {
        let url = format!("http://{netloc}/");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Rejected(response.status().as_u16()))
        }
    }

    /// Best-effort shutdown notification; failures are swallowed, matching
    /// §6's "GET `/kill/` on shutdown (best-effort)".
    fn kill(&self, netloc: &str) {
        let url = format!("http://{netloc}/kill/");
        if let Err(e) = self.client.get(&url).send() {
            tracing::debug!(netloc, error = %e, "best-effort kill request failed");
        }
    }
}
