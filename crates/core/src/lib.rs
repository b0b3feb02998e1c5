//! Master-side coordination core of a distributed dataflow job-execution
//! engine: the lazy task pool and scheduler, the job pool, the worker
//! pool, the dispatcher, and the in-process event bus they share.
//!
//! This crate has no network front door of its own -- `master-server`
//! wires it to an HTTP API and a real outbound worker transport.

pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod event_bus;
pub mod global_names;
pub mod job;
pub mod job_pool;
pub mod journal;
pub mod lazy_task_pool;
pub mod reference;
pub mod task;
pub mod transport;
pub mod worker_pool;

pub use worker_pool::WorkerId;

/// Opaque task identifier. Root tasks use `root:<job_id>`; spawned
/// children are named by their submitting worker.
pub type TaskId = String;

pub mod prelude {
    pub use crate::descriptor::{TaskCommit, TaskDescriptor, TaskFailureReport};
    pub use crate::dispatcher::Dispatcher;
    pub use crate::error::{ControlError, TaskFailureReason};
    pub use crate::event_bus::{Event, EventBus};
    pub use crate::global_names::GlobalNameDirectory;
    pub use crate::job::{Job, JobId, JobState};
    pub use crate::job_pool::JobPool;
    pub use crate::journal::Journal;
    pub use crate::lazy_task_pool::{LazyTaskPool, TaskDescriptorExtras};
    pub use crate::reference::{Provenance, Reference, ReferenceId};
    pub use crate::task::{Task, TaskState};
    pub use crate::transport::{TransportError, WorkerTransport};
    pub use crate::worker_pool::{WorkerDescriptor, WorkerId, WorkerPool};
    pub use crate::TaskId;
}
