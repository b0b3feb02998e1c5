//! Axum handlers for the §6 inbound RPC surface. Each one is a thin
//! adapter: decode the body, call into the core pools through
//! [`crate::app::AppState`], and reshape the result into a wire type.
//! None of the dataflow semantics live here.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use master_core::prelude::{
    ControlError, Job, JobId, TaskCommit, TaskDescriptor, TaskFailureReason, TaskFailureReport,
    WorkerDescriptor,
};

use crate::app::AppState;
use crate::dto::{
    JobStatusResponse, RegisterWorkerRequest, RegisterWorkerResponse, SubmitJobResponse,
    WaitForJobResponse, WorkerHeartbeatRequest,
};

pub async fn submit_job(
    State(state): State<AppState>,
    Json(descriptor): Json<TaskDescriptor>,
) -> Json<SubmitJobResponse> {
    let job_id = state.job_pool.submit(descriptor);
    Json(SubmitJobResponse { job_id })
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    let job = state.job_pool.job(job_id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(job_status_response(job_id, &job, &state)))
}

pub async fn wait_for_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<Json<WaitForJobResponse>, ControlError> {
    let job_pool = state.job_pool.clone();
    let result = tokio::task::spawn_blocking(move || job_pool.wait_for_completion(job_id))
        .await
        .unwrap_or(Err(ControlError::ServerStopping))?;
    Ok(Json(WaitForJobResponse { result_ref: result }))
}

pub async fn register_worker(
    State(state): State<AppState>,
    Json(request): Json<RegisterWorkerRequest>,
) -> Json<RegisterWorkerResponse> {
    let worker_id = state.worker_pool.create_worker(WorkerDescriptor {
        netloc: request.netloc,
        features: request.features,
    });
    Json(RegisterWorkerResponse { worker_id })
}

pub async fn worker_heartbeat(
    State(state): State<AppState>,
    Path(worker_id): Path<u64>,
    Json(_request): Json<WorkerHeartbeatRequest>,
) -> StatusCode {
    state.worker_pool.worker_ping(worker_id);
    StatusCode::OK
}

pub async fn worker_commit(
    State(state): State<AppState>,
    Json(commit): Json<TaskCommit>,
) -> StatusCode {
    if let Some(worker_id) = state
        .lazy_task_pool
        .task_completed(&commit.task_id, commit.bindings)
    {
        state.worker_pool.worker_idle(worker_id);
    }
    StatusCode::OK
}

pub async fn worker_task_failed(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(report): Json<TaskFailureReport>,
) -> StatusCode {
    let reason = match report {
        TaskFailureReport::WorkerFailed => TaskFailureReason::WorkerFailed,
        TaskFailureReport::MissingInput { detail } => TaskFailureReason::MissingInput { detail },
        TaskFailureReport::RuntimeException { message } => {
            TaskFailureReason::RuntimeException(message)
        }
    };
    if let Some(worker_id) = state.lazy_task_pool.task_failed(&task_id, reason) {
        state.worker_pool.worker_idle(worker_id);
    }
    StatusCode::OK
}

/// A worker reports a task it spawned while executing `parent_task_id`.
/// Routed to the parent's job without the caller needing to track job
/// ids itself.
pub async fn spawn_child_task(
    State(state): State<AppState>,
    Path(parent_task_id): Path<String>,
    Json(mut descriptor): Json<TaskDescriptor>,
) -> StatusCode {
    let Some(job_id) = state.lazy_task_pool.job_id_for(&parent_task_id) else {
        return StatusCode::NOT_FOUND;
    };
    descriptor.parent_task_id = Some(parent_task_id);
    match state.job_pool.admit_child_task(job_id, descriptor) {
        Some(()) => StatusCode::ACCEPTED,
        None => StatusCode::NOT_FOUND,
    }
}

fn job_status_response(job_id: Uuid, job: &Job, state: &AppState) -> JobStatusResponse {
    JobStatusResponse {
        id: job_id,
        state: job.state(),
        root_task_id: job.root_task_id.clone(),
        expected_outputs: state.lazy_task_pool.expected_outputs_for(&job.root_task_id),
        task_state_counts: job.task_state_counts(),
        result_ref: job.result_ref(),
    }
}
