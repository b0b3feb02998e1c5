use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::job::Job;
use crate::reference::{Reference, ReferenceId};
use crate::{TaskId, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Created,
    Blocking,
    Runnable,
    Queued,
    Assigned,
    Committed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Committed | TaskState::Failed)
    }
}

/// A unit of work with declared expected outputs and dependencies.
///
/// `job` is a back-pointer used for bookkeeping (task-state counters,
/// completion signalling); the lazy task pool never uses it to extend a
/// job's lifetime; the job pool's own map is what keeps a job alive.
pub struct Task {
    pub task_id: TaskId,
    pub job: Arc<Job>,
    pub parent_task_id: Option<TaskId>,
    pub state: TaskState,
    pub current_attempt: u32,
    pub expected_outputs: Vec<ReferenceId>,
    pub dependencies: HashMap<String, Reference>,
    pub inputs: HashMap<String, Reference>,
    pub blocked_on: HashSet<ReferenceId>,
    pub worker: Option<WorkerId>,
    pub children: Vec<TaskId>,
    pub continues_task: Option<TaskId>,
    pub require_features: Vec<String>,
    pub handler: String,
    /// Opaque continuation/selection fields the core never interprets;
    /// it only round-trips them onto the outbound task descriptor
    /// unmodified (see DESIGN.md, §9).
    pub save_continuation: bool,
    pub select_group: Option<String>,
    pub select_timeout: Option<u64>,
    pub replay_uuids: Vec<String>,
}

impl Task {
    pub fn new(
        task_id: TaskId,
        job: Arc<Job>,
        handler: String,
        expected_outputs: Vec<ReferenceId>,
        dependencies: HashMap<String, Reference>,
    ) -> Self {
        Self {
            task_id,
            job,
            parent_task_id: None,
            state: TaskState::Created,
            current_attempt: 0,
            expected_outputs,
            dependencies,
            inputs: HashMap::new(),
            blocked_on: HashSet::new(),
            worker: None,
            children: Vec::new(),
            continues_task: None,
            require_features: Vec::new(),
            handler,
            save_continuation: false,
            select_group: None,
            select_timeout: None,
            replay_uuids: Vec::new(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        !self.blocked_on.is_empty()
    }
}
