use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::reference::{Reference, ReferenceId};
use crate::TaskId;

/// Wire format for a task, submitted by a client or a worker reporting a
/// spawned child, and the format persisted in the task journal.
///
/// `expected_outputs` is taken as given when present; otherwise the
/// admitting side derives it from `num_outputs` by allocating that many
/// fresh reference ids, or allocates exactly one if neither is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub task_id: TaskId,
    #[serde(default)]
    pub parent_task_id: Option<TaskId>,
    pub handler: String,
    #[serde(default)]
    pub inputs: HashMap<String, Reference>,
    #[serde(default)]
    pub expected_outputs: Option<Vec<ReferenceId>>,
    #[serde(default)]
    pub num_outputs: Option<usize>,
    #[serde(default)]
    pub continues_task: Option<TaskId>,
    #[serde(default)]
    pub require_features: Vec<String>,
    #[serde(default)]
    pub save_continuation: bool,
    /// Opaque worker-side selection group/timeout, round-tripped
    /// unmodified; the core never interprets them (see DESIGN.md).
    #[serde(default)]
    pub select_group: Option<String>,
    #[serde(default)]
    pub select_timeout: Option<u64>,
    #[serde(default)]
    pub replay_uuids: Vec<String>,
}

/// Result of a worker reporting a commit: the concrete references each
/// expected output resolved to. A list per id because a single produced
/// output may be reachable from more than one network location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCommit {
    pub task_id: TaskId,
    pub bindings: HashMap<ReferenceId, Vec<Reference>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskFailureReport {
    WorkerFailed,
    MissingInput { detail: Option<Reference> },
    RuntimeException { message: String },
}
