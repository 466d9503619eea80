//! Operator surface for dead-lettered tasks.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use parallax_core::error::CoreError;
use parallax_core::stage::Stage;
use parallax_core::task::TaskKey;
use parallax_core::types::JobId;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

fn parse_key(job_id: JobId, stage: &str) -> AppResult<TaskKey> {
    let stage = Stage::from_name(stage)
        .ok_or_else(|| AppError::Core(CoreError::Validation(format!("unknown stage '{stage}'"))))?;
    Ok(TaskKey::new(job_id, stage))
}

/// GET /api/v1/dead-letters
///
/// All dead-lettered tasks, oldest first.
pub async fn list_dead_letters(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let entries = state.orchestrator.list_dead_letters().await?;
    Ok(Json(DataResponse { data: entries }))
}

/// POST /api/v1/dead-letters/{job_id}/{stage}/replay
///
/// Clear the entry and re-enqueue the stage with a fresh attempt budget.
pub async fn replay_dead_letter(
    State(state): State<AppState>,
    Path((job_id, stage)): Path<(JobId, String)>,
) -> AppResult<impl IntoResponse> {
    let key = parse_key(job_id, &stage)?;
    let job = state.orchestrator.replay_dead_letter(key).await?;
    tracing::info!(job_id = %job.id, stage = %key.stage, "Dead letter replayed");
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/dead-letters/{job_id}/{stage}/discard
///
/// Drop the entry without touching the job; it stays failed.
pub async fn discard_dead_letter(
    State(state): State<AppState>,
    Path((job_id, stage)): Path<(JobId, String)>,
) -> AppResult<impl IntoResponse> {
    let key = parse_key(job_id, &stage)?;
    state.orchestrator.discard_dead_letter(key).await?;
    tracing::info!(job_id = %job_id, stage = %key.stage, "Dead letter discarded");
    Ok(StatusCode::NO_CONTENT)
}
