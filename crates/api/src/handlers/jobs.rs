//! Handlers for the `/jobs` resource.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use parallax_core::job::JobStatus;
use parallax_core::task::{PRIORITY_FREE, PRIORITY_PREMIUM, PRIORITY_STANDARD};
use parallax_core::types::{ArtifactRef, JobId, ProjectId};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    /// Owning project.
    pub project_id: ProjectId,
    /// Reference to the uploaded scan or walkthrough video.
    pub input_ref: String,
    /// Priority tier: `premium`, `standard` (default), or `free`.
    pub tier: Option<String>,
}

/// Interim representation returned while a cancellation is in flight.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellingView {
    pub id: JobId,
    pub status: &'static str,
}

fn priority_for_tier(tier: Option<&str>) -> AppResult<i32> {
    match tier {
        None | Some("standard") => Ok(PRIORITY_STANDARD),
        Some("premium") => Ok(PRIORITY_PREMIUM),
        Some("free") => Ok(PRIORITY_FREE),
        Some(other) => Err(AppError::BadRequest(format!(
            "Unknown tier '{other}' (expected premium, standard, or free)"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Submit a new pipeline job. Returns 201 with the created job, already
/// queued for its first stage.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<SubmitJobRequest>,
) -> AppResult<impl IntoResponse> {
    if input.input_ref.trim().is_empty() {
        return Err(AppError::BadRequest("inputRef must not be empty".into()));
    }
    let priority = priority_for_tier(input.tier.as_deref())?;

    let job = state
        .orchestrator
        .submit(input.project_id, ArtifactRef::new(input.input_ref), priority)
        .await?;

    tracing::info!(job_id = %job.id, project_id = %job.project_id, priority, "Job submitted");

    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// List / get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
pub async fn list_jobs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let jobs = state.orchestrator.list_jobs().await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
///
/// Status, current stage, per-stage attempt counts, and the last error.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.orchestrator.get_job(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Cancel any non-terminal job. A job whose task is still queued is
/// finalized immediately (200 with the cancelled job); a job with a
/// running executor gets its cancel flag set and token tripped, and the
/// response is 202 with a `cancelling` placeholder until the worker
/// reports back.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<axum::response::Response> {
    let job = state.orchestrator.cancel(job_id).await?;

    if job.status == JobStatus::Cancelled {
        tracing::info!(job_id = %job.id, "Job cancelled");
        return Ok(Json(DataResponse { data: job }).into_response());
    }

    tracing::info!(job_id = %job.id, "Job cancellation requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: CancellingView {
                id: job.id,
                status: "cancelling",
            },
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/retry
///
/// Re-enqueue a failed job at the stage that exhausted its retries. The
/// attempt counter resets and any dead-letter entry for the stage is
/// cleared.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let current = state.orchestrator.get_job(job_id).await?;
    if current.status != JobStatus::Failed {
        return Err(AppError::BadRequest(
            "Only failed jobs can be retried".into(),
        ));
    }

    let job = state.orchestrator.resume(job_id).await?;
    tracing::info!(job_id = %job.id, stage = ?job.stage(), "Job retried");
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Pause / resume
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/pause
///
/// Withdraw a queued job's task before a worker picks it up. Rejected
/// with 409 once the task is leased.
pub async fn pause_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.orchestrator.pause(job_id).await?;
    tracing::info!(job_id = %job.id, "Job paused");
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/jobs/{id}/resume
pub async fn resume_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.orchestrator.resume(job_id).await?;
    tracing::info!(job_id = %job.id, "Job resumed");
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/checkpoints
///
/// The job's checkpoint history in pipeline order.
pub async fn list_checkpoints(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let checkpoints = state.orchestrator.checkpoints_for_job(job_id).await?;
    Ok(Json(DataResponse { data: checkpoints }))
}
