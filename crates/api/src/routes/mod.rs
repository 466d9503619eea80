pub mod dead_letters;
pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /jobs                                list, submit
/// /jobs/{id}                           get
/// /jobs/{id}/cancel                    cancel (POST)
/// /jobs/{id}/retry                     retry a failed job (POST)
/// /jobs/{id}/pause                     pause a queued job (POST)
/// /jobs/{id}/resume                    resume a paused job (POST)
/// /jobs/{id}/checkpoints               checkpoint history
///
/// /dead-letters                        list
/// /dead-letters/{job_id}/{stage}/replay    replay (POST)
/// /dead-letters/{job_id}/{stage}/discard   discard (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/dead-letters", dead_letters::router())
}
