use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ControlError;
use crate::reference::Reference;
use crate::task::TaskState;
use crate::TaskId;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Active,
    Completed,
    Failed,
}

struct Inner {
    state: JobState,
    result_ref: Option<Reference>,
    task_state_counts: HashMap<TaskState, usize>,
    active_waiters: usize,
}

/// An externally-submitted root of a task tree. Completes when the
/// concrete/data reference for its root task's expected output is
/// published; fails if that output becomes an Error reference, or if
/// the master is stopping while waiters are blocked on it.
pub struct Job {
    pub id: JobId,
    pub root_task_id: TaskId,
    inner: Mutex<Inner>,
    completed: Condvar,
    stopping: Arc<AtomicBool>,
    max_waiters: usize,
}

impl Job {
    pub fn new(id: JobId, root_task_id: TaskId, stopping: Arc<AtomicBool>, max_waiters: usize) -> Self {
        Self {
            id,
            root_task_id,
            inner: Mutex::new(Inner {
                state: JobState::Active,
                result_ref: None,
                task_state_counts: HashMap::new(),
                active_waiters: 0,
            }),
            completed: Condvar::new(),
            stopping,
            max_waiters,
        }
    }

    pub fn state(&self) -> JobState {
        self.inner.lock().state
    }

    pub fn result_ref(&self) -> Option<Reference> {
        self.inner.lock().result_ref.clone()
    }

    pub fn task_state_counts(&self) -> HashMap<TaskState, usize> {
        self.inner.lock().task_state_counts.clone()
    }

    pub fn record_task_admitted(&self, state: TaskState) {
        *self.inner.lock().task_state_counts.entry(state).or_insert(0) += 1;
    }

    pub fn record_task_transition(&self, from: TaskState, to: TaskState) {
        if from == to {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some(count) = inner.task_state_counts.get_mut(&from) {
            *count = count.saturating_sub(1);
        }
        *inner.task_state_counts.entry(to).or_insert(0) += 1;
    }

    /// Marks the job COMPLETED with `result` and wakes every waiter.
    /// A job reaches this state exactly once; later calls are ignored.
    pub fn complete(&self, result: Reference) {
        let mut inner = self.inner.lock();
        if inner.state != JobState::Active {
            return;
        }
        inner.state = JobState::Completed;
        inner.result_ref = Some(result);
        drop(inner);
        self.completed.notify_all();
    }

    pub fn fail(&self, result: Reference) {
        let mut inner = self.inner.lock();
        if inner.state != JobState::Active {
            return;
        }
        inner.state = JobState::Failed;
        inner.result_ref = Some(result);
        drop(inner);
        self.completed.notify_all();
    }

    /// Blocks the calling thread until the job reaches a terminal state,
    /// the process is stopping, or this job already has `max_waiters`
    /// concurrent waiters (in which case this call fails immediately
    /// rather than queueing).
    pub fn wait_for_completion(&self) -> Result<Reference, ControlError> {
        let mut inner = self.inner.lock();

        if inner.active_waiters >= self.max_waiters {
            return Err(ControlError::TooManyWaiters);
        }
        inner.active_waiters += 1;

        let result = loop {
            if self.stopping.load(Ordering::SeqCst) {
                break Err(ControlError::ServerStopping);
            }
            match inner.state {
                JobState::Active => {
                    self.completed.wait(&mut inner);
                }
                JobState::Completed | JobState::Failed => {
                    break Ok(inner.result_ref.clone().expect("terminal job has a result"));
                }
            }
        };

        inner.active_waiters -= 1;
        result
    }

    /// Called by the job pool when the whole process is stopping; wakes
    /// every blocked waiter so it can observe `SERVER_STOPPING`.
    pub fn notify_stopping(&self) {
        self.completed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            Uuid::new_v4(),
            "root:test".into(),
            Arc::new(AtomicBool::new(false)),
            10,
        )
    }

    #[test]
    fn completes_exactly_once() {
        let j = job();
        j.complete(Reference::Null { id: 1 });
        j.complete(Reference::Null { id: 2 });
        assert_eq!(j.result_ref().unwrap().id(), 1);
        assert_eq!(j.state(), JobState::Completed);
    }

    #[test]
    fn waiter_observes_completion_from_another_thread() {
        use std::thread;
        use std::time::Duration;

        let j = Arc::new(job());
        let j2 = j.clone();
        let handle = thread::spawn(move || j2.wait_for_completion());

        thread::sleep(Duration::from_millis(20));
        j.complete(Reference::Null { id: 42 });

        let result = handle.join().unwrap().unwrap();
        assert_eq!(result.id(), 42);
    }

    #[test]
    fn rejects_waiter_past_the_cap() {
        let j = Job::new(
            Uuid::new_v4(),
            "root:test".into(),
            Arc::new(AtomicBool::new(false)),
            0,
        );
        let result = j.wait_for_completion();
        assert!(matches!(result, Err(ControlError::TooManyWaiters)));
    }

    #[test]
    fn stopping_wakes_waiter_with_server_stopping() {
        use std::thread;
        use std::time::Duration;

        let stopping = Arc::new(AtomicBool::new(false));
        let j = Arc::new(Job::new(Uuid::new_v4(), "root:test".into(), stopping.clone(), 10));
        let j2 = j.clone();
        let handle = thread::spawn(move || j2.wait_for_completion());

        thread::sleep(Duration::from_millis(20));
        stopping.store(true, Ordering::SeqCst);
        j.notify_stopping();

        let result = handle.join().unwrap();
        assert!(matches!(result, Err(ControlError::ServerStopping)));
    }
}
