//! Wire-format request/response bodies for the inbound RPC surface.
//! `TaskDescriptor`, `TaskCommit`, and `Reference` themselves live in
//! `master-core` since they are shared with the journal format.

use std::collections::HashMap;

use master_core::prelude::{JobId, JobState, Reference, ReferenceId, TaskId, TaskState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub id: JobId,
    pub state: JobState,
    pub root_task_id: TaskId,
    pub expected_outputs: Vec<ReferenceId>,
    pub task_state_counts: HashMap<TaskState, usize>,
    pub result_ref: Option<Reference>,
}

#[derive(Debug, Serialize)]
pub struct WaitForJobResponse {
    pub result_ref: Reference,
}

#[derive(Debug, Deserialize)]
pub struct RegisterWorkerRequest {
    pub netloc: String,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterWorkerResponse {
    pub worker_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct WorkerHeartbeatRequest {
    #[serde(default)]
    pub news: Option<serde_json::Value>,
}
