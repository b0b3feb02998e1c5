use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::descriptor::TaskDescriptor;
use crate::error::{ControlError, TaskFailureReason};
use crate::event_bus::{Event, EventBus};
use crate::lazy_task_pool::LazyTaskPool;
use crate::transport::WorkerTransport;
use crate::TaskId;

pub type WorkerId = u64;

#[derive(Debug, Clone)]
pub struct WorkerDescriptor {
    pub netloc: String,
    pub features: Vec<String>,
}

struct WorkerEntry {
    id: WorkerId,
    netloc: String,
    features: HashSet<String>,
    current_task_id: Option<TaskId>,
    last_ping: Instant,
    failed: bool,
}

struct Inner {
    next_id: WorkerId,
    workers: HashMap<WorkerId, WorkerEntry>,
    netloc_index: HashMap<String, WorkerId>,
    idle: HashSet<WorkerId>,
    version: u64,
    active_waiters: usize,
}

/// Tracks worker registrations, liveness, the idle set, and per-worker
/// failure detection. Publishes `schedule` whenever a worker becomes a
/// candidate for dispatch.
pub struct WorkerPool {
    inner: Mutex<Inner>,
    changed: Condvar,
    event_bus: Arc<EventBus>,
    lazy_task_pool: Arc<LazyTaskPool>,
    transport: Arc<dyn WorkerTransport>,
    stopping: Arc<AtomicBool>,
    max_version_waiters: usize,
}

impl WorkerPool {
    pub fn new(
        event_bus: Arc<EventBus>,
        lazy_task_pool: Arc<LazyTaskPool>,
        transport: Arc<dyn WorkerTransport>,
        stopping: Arc<AtomicBool>,
        max_version_waiters: usize,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                workers: HashMap::new(),
                netloc_index: HashMap::new(),
                idle: HashSet::new(),
                version: 0,
                active_waiters: 0,
            }),
            changed: Condvar::new(),
            event_bus,
            lazy_task_pool,
            transport,
            stopping,
            max_version_waiters,
        }
    }

    pub fn create_worker(&self, descriptor: WorkerDescriptor) -> WorkerId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        inner.netloc_index.insert(descriptor.netloc.clone(), id);
        inner.workers.insert(
            id,
            WorkerEntry {
                id,
                netloc: descriptor.netloc,
                features: descriptor.features.into_iter().collect(),
                current_task_id: None,
                last_ping: Instant::now(),
                failed: false,
            },
        );
        inner.idle.insert(id);
        inner.version += 1;
        drop(inner);

        self.changed.notify_all();
        self.event_bus.publish(Event::Schedule);
        id
    }

    pub fn worker_idle(&self, worker_id: WorkerId) {
        let mut inner = self.inner.lock();
        if let Some(w) = inner.workers.get_mut(&worker_id) {
            if w.failed {
                return;
            }
            w.current_task_id = None;
        } else {
            return;
        }
        inner.idle.insert(worker_id);
        inner.version += 1;
        drop(inner);

        self.changed.notify_all();
        self.event_bus.publish(Event::WorkerIdle { worker_id });
        self.event_bus.publish(Event::Schedule);
    }

    pub fn worker_ping(&self, worker_id: WorkerId) {
        let mut inner = self.inner.lock();
        if let Some(w) = inner.workers.get_mut(&worker_id) {
            w.last_ping = Instant::now();
        }
        inner.version += 1;
        drop(inner);
        self.changed.notify_all();
    }

    /// Finds an idle worker advertising every feature `task` requires,
    /// without removing it from the idle set; the caller must then call
    /// [`WorkerPool::execute_task_on_worker`] to claim it.
    pub fn idle_worker_matching(&self, required_features: &[String]) -> Option<WorkerId> {
        let inner = self.inner.lock();
        inner
            .idle
            .iter()
            .copied()
            .find(|id| {
                inner
                    .workers
                    .get(id)
                    .map_or(false, |w| required_features.iter().all(|f| w.features.contains(f)))
            })
    }

    /// Removes `worker_id` from the idle set, marks `task_id` ASSIGNED
    /// to it, and issues the assignment RPC outside the lock. Returns
    /// `false` (with the task left unassigned in the lazy task pool) if
    /// the worker had already been claimed by a racing dispatch.
    pub fn execute_task_on_worker(
        &self,
        worker_id: WorkerId,
        task_id: &str,
        descriptor: &TaskDescriptor,
    ) -> bool {
        let netloc = {
            let mut inner = self.inner.lock();
            if !inner.idle.remove(&worker_id) {
                return false;
            }
            match inner.workers.get_mut(&worker_id) {
                Some(w) => {
                    w.current_task_id = Some(task_id.to_string());
                    w.netloc.clone()
                }
                None => return false,
            }
        };

        self.lazy_task_pool.mark_assigned(task_id, worker_id);

        match self.transport.assign(&netloc, descriptor) {
            Ok(()) => true,
            Err(_) => {
                self.worker_failed(worker_id);
                false
            }
        }
    }

    /// Investigates a worker's task assignment failing: removes it from
    /// circulation and reports its in-flight task, if any, to the lazy
    /// task pool as WORKER_FAILED. A no-op if the worker had already
    /// failed (monotonic).
    pub fn worker_failed(&self, worker_id: WorkerId) {
        let task_id = {
            let mut inner = self.inner.lock();
            inner.idle.remove(&worker_id);

            let netloc = match inner.workers.get(&worker_id) {
                Some(w) if w.failed => return,
                Some(w) => w.netloc.clone(),
                None => return,
            };
            inner.netloc_index.remove(&netloc);

            let w = inner.workers.get_mut(&worker_id).expect("checked above");
            w.failed = true;
            inner.version += 1;
            w.current_task_id.take()
        };

        self.changed.notify_all();
        self.event_bus.publish(Event::WorkerFailed { worker_id });

        if let Some(task_id) = task_id {
            self.lazy_task_pool.task_failed(&task_id, TaskFailureReason::WorkerFailed);
        }
    }

    /// Aborts a worker's current task by asking it directly; on success
    /// the worker returns to idle, otherwise it is marked failed.
    pub fn abort_current_task(&self, worker_id: WorkerId) {
        let (netloc, task_id) = {
            let inner = self.inner.lock();
            match inner.workers.get(&worker_id) {
                Some(w) => (w.netloc.clone(), w.current_task_id.clone()),
                None => return,
            }
        };
        let Some(task_id) = task_id else { return };

        match self.transport.abort(&netloc, &task_id) {
            Ok(()) => self.worker_idle(worker_id),
            Err(_) => self.worker_failed(worker_id),
        }
    }

    /// Probes every worker whose last heartbeat is older than
    /// `threshold`; workers that fail the health check are reported
    /// failed. Intended to be driven by a periodic deferred-work loop.
    pub fn reap_dead_workers(&self, threshold: Duration) {
        let stale: Vec<(WorkerId, String)> = {
            let inner = self.inner.lock();
            let now = Instant::now();
            inner
                .workers
                .values()
                .filter(|w| !w.failed && now.duration_since(w.last_ping) > threshold)
                .map(|w| (w.id, w.netloc.clone()))
                .collect()
        };

        for (id, netloc) in stale {
            if self.transport.health_check(&netloc).is_err() {
                self.worker_failed(id);
            }
        }
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    /// Long-polls for the worker-pool version counter to advance past
    /// `target`, bounded to `max_version_waiters` concurrent callers.
    pub fn await_version_after(&self, target: u64) -> Result<u64, ControlError> {
        let mut inner = self.inner.lock();
        if inner.active_waiters >= self.max_version_waiters {
            return Err(ControlError::TooManyWaiters);
        }
        inner.active_waiters += 1;

        let result = loop {
            if self.stopping.load(Ordering::SeqCst) {
                break Err(ControlError::ServerStopping);
            }
            if inner.version > target {
                break Ok(inner.version);
            }
            self.changed.wait(&mut inner);
        };

        inner.active_waiters -= 1;
        result
    }

    pub fn notify_stopping(&self) {
        self.changed.notify_all();
    }

    /// Best-effort `GET /kill/` on every known worker, regardless of its
    /// current liveness, used once on master shutdown.
    pub fn kill_all(&self) {
        let netlocs: Vec<String> = self
            .inner
            .lock()
            .workers
            .values()
            .map(|w| w.netloc.clone())
            .collect();
        for netloc in netlocs {
            self.transport.kill(&netloc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global_names::GlobalNameDirectory;

    fn pool() -> Arc<WorkerPool> {
        let bus = Arc::new(EventBus::new());
        let names = Arc::new(GlobalNameDirectory::new(bus.clone()));
        let ltp = Arc::new(LazyTaskPool::new(bus.clone(), names));
        Arc::new(WorkerPool::new(
            bus,
            ltp,
            Arc::new(crate::transport::UnreachableTransport),
            Arc::new(AtomicBool::new(false)),
            5,
        ))
    }

    #[test]
    fn create_worker_makes_it_idle_and_bumps_version() {
        let pool = pool();
        let v0 = pool.version();
        let id = pool.create_worker(WorkerDescriptor {
            netloc: "w0:9000".into(),
            features: vec![],
        });
        assert!(pool.version() > v0);
        assert_eq!(pool.idle_worker_matching(&[]), Some(id));
    }

    #[test]
    fn idle_worker_matching_respects_required_features() {
        let pool = pool();
        pool.create_worker(WorkerDescriptor {
            netloc: "w0:9000".into(),
            features: vec!["gpu".into()],
        });
        assert_eq!(pool.idle_worker_matching(&["tpu".to_string()]), None);
        assert!(pool.idle_worker_matching(&["gpu".to_string()]).is_some());
    }

    #[test]
    fn worker_failed_is_monotonic_and_removes_from_idle() {
        let pool = pool();
        let id = pool.create_worker(WorkerDescriptor {
            netloc: "w0:9000".into(),
            features: vec![],
        });
        pool.worker_failed(id);
        assert_eq!(pool.idle_worker_matching(&[]), None);
        let v1 = pool.version();
        pool.worker_failed(id);
        assert_eq!(pool.version(), v1);
    }

    #[test]
    fn await_version_after_rejects_past_the_waiter_cap() {
        let bus = Arc::new(EventBus::new());
        let names = Arc::new(GlobalNameDirectory::new(bus.clone()));
        let ltp = Arc::new(LazyTaskPool::new(bus.clone(), names));
        let pool = WorkerPool::new(
            bus,
            ltp,
            Arc::new(crate::transport::UnreachableTransport),
            Arc::new(AtomicBool::new(false)),
            0,
        );
        assert!(matches!(
            pool.await_version_after(0),
            Err(ControlError::TooManyWaiters)
        ));
    }
}
