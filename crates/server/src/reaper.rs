//! Periodic dead-worker sweep (§4.2 `reap_dead_workers`). Run as the
//! binary's one other tokio tenant besides the HTTP server; the actual
//! health-check RPC is synchronous `reqwest::blocking`, so each tick is
//! handed to `spawn_blocking` rather than run inline on a runtime thread.

use std::sync::Arc;
use std::time::Duration;

use master_core::prelude::WorkerPool;

/// Spawns the reaper loop on the current tokio runtime. Ticks every
/// `period`, probing any worker whose heartbeat is older than
/// `threshold`. Runs until `should_stop` returns true.
pub fn spawn(
    worker_pool: Arc<WorkerPool>,
    period: Duration,
    threshold: Duration,
    should_stop: impl Fn() -> bool + Send + 'static,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if should_stop() {
                break;
            }
            let pool = worker_pool.clone();
            let _ = tokio::task::spawn_blocking(move || pool.reap_dead_workers(threshold)).await;
        }
    })
}
