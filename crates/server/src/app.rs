//! The inbound RPC surface. Plain `axum::Router` rather than the
//! teacher's `aide::axum::ApiRouter`: this workspace carries no OpenAPI
//! schema generation dependency, so routes are wired the ordinary way.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use master_core::prelude::{JobPool, LazyTaskPool, WorkerPool};

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub job_pool: Arc<JobPool>,
    pub worker_pool: Arc<WorkerPool>,
    pub lazy_task_pool: Arc<LazyTaskPool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(handlers::submit_job))
        .route("/jobs/:job_id", get(handlers::job_status))
        .route("/jobs/:job_id/wait", get(handlers::wait_for_job))
        .route("/workers", post(handlers::register_worker))
        .route("/workers/:worker_id/heartbeat", post(handlers::worker_heartbeat))
        .route("/tasks/commit", post(handlers::worker_commit))
        .route("/tasks/:task_id/failed", post(handlers::worker_task_failed))
        .route("/tasks/:task_id/children", post(handlers::spawn_child_task))
        .with_state(state)
}
