//! Wires `master-core`'s lazy task pool, job pool, and worker pool to a
//! network front door: an `axum` inbound RPC surface, a `reqwest::blocking`
//! outbound worker transport, a dedicated dispatch thread, and a periodic
//! dead-worker reaper. The core crate stays free of any particular
//! transport or async runtime; everything in this crate is ambient
//! plumbing around it.

pub mod app;
pub mod dto;
pub mod handlers;
pub mod reaper;
pub mod worker_client;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use config::SchedulingConfig;
use crossbeam_channel::{Receiver, Sender};
use master_core::prelude::*;
use parking_lot::Mutex;

pub use app::AppState;

/// Owns every long-lived piece of the master and the background threads
/// that drive them. Constructing one wires the event bus subscriptions
/// that make `schedule` wake the dispatcher and `stop` propagate to the
/// job pool before anything else observes it.
pub struct Master {
    pub event_bus: Arc<EventBus>,
    pub global_names: Arc<GlobalNameDirectory>,
    pub lazy_task_pool: Arc<LazyTaskPool>,
    pub worker_pool: Arc<WorkerPool>,
    pub job_pool: Arc<JobPool>,
    dispatcher: Arc<Dispatcher>,
    dispatch_wake_rx: Mutex<Option<Receiver<()>>>,
    worker_pool_stopping: Arc<AtomicBool>,
}

impl Master {
    pub fn new(journal_root: PathBuf, scheduling: &SchedulingConfig) -> Self {
        let event_bus = Arc::new(EventBus::new());
        let global_names = Arc::new(GlobalNameDirectory::new(event_bus.clone()));
        let lazy_task_pool = Arc::new(LazyTaskPool::with_max_attempts(
            event_bus.clone(),
            global_names.clone(),
            scheduling.max_task_attempts,
        ));

        let transport: Arc<dyn WorkerTransport> = Arc::new(worker_client::ReqwestWorkerTransport::new());
        let worker_pool_stopping = Arc::new(AtomicBool::new(false));
        let worker_pool = Arc::new(WorkerPool::new(
            event_bus.clone(),
            lazy_task_pool.clone(),
            transport,
            worker_pool_stopping.clone(),
            scheduling.max_worker_pool_waiters,
        ));

        let job_pool = Arc::new(JobPool::new(
            journal_root,
            lazy_task_pool.clone(),
            global_names.clone(),
            scheduling.max_job_waiters,
        ));

        let dispatcher = Arc::new(Dispatcher::new(lazy_task_pool.clone(), worker_pool.clone()));

        // Priority so the job pool's waiters wake to SERVER_STOPPING
        // before the dispatcher and worker pool observe the same event.
        let job_pool_for_stop = job_pool.clone();
        event_bus.subscribe_priority(move |event| {
            if let Event::Stop = event {
                job_pool_for_stop.stop();
            }
        });
        let worker_pool_for_stop = worker_pool.clone();
        let worker_pool_stopping_for_stop = worker_pool_stopping.clone();
        event_bus.subscribe(move |event| {
            if let Event::Stop = event {
                worker_pool_stopping_for_stop.store(true, Ordering::SeqCst);
                worker_pool_for_stop.notify_stopping();
            }
        });

        let (wake_tx, wake_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::unbounded();
        event_bus.subscribe(move |event| {
            if let Event::Schedule = event {
                let _ = wake_tx.send(());
            }
        });

        Self {
            event_bus,
            global_names,
            lazy_task_pool,
            worker_pool,
            job_pool,
            dispatcher,
            dispatch_wake_rx: Mutex::new(Some(wake_rx)),
            worker_pool_stopping,
        }
    }

    /// Spawns the dedicated dispatch thread; one dispatch pass runs per
    /// `schedule` wake-up. Panics if called more than once.
    pub fn spawn_dispatcher_thread(&self) -> std::thread::JoinHandle<()> {
        let wake_rx = self
            .dispatch_wake_rx
            .lock()
            .take()
            .expect("dispatcher thread already spawned");
        let dispatcher = self.dispatcher.clone();
        std::thread::Builder::new()
            .name("dispatcher".into())
            .spawn(move || dispatcher.run_loop(wake_rx))
            .expect("failed to spawn dispatcher thread")
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            job_pool: self.job_pool.clone(),
            worker_pool: self.worker_pool.clone(),
            lazy_task_pool: self.lazy_task_pool.clone(),
        }
    }

    /// Broadcasts `stop` on the event bus, waking every job-completion,
    /// worker-pool-version, and global-name waiter with a Stopping error,
    /// then best-effort kills every known worker.
    pub fn stop(&self) {
        self.event_bus.publish(Event::Stop);
        self.worker_pool.kill_all();
    }

    pub fn is_stopping(&self) -> bool {
        self.worker_pool_stopping.load(Ordering::SeqCst)
    }
}
