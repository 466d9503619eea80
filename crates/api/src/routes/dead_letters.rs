//! Route definitions for the `/dead-letters` operator surface.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::dead_letters;
use crate::state::AppState;

/// Routes mounted at `/dead-letters`.
///
/// ```text
/// GET    /                            -> list_dead_letters
/// POST   /{job_id}/{stage}/replay     -> replay_dead_letter
/// POST   /{job_id}/{stage}/discard    -> discard_dead_letter
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(dead_letters::list_dead_letters))
        .route(
            "/{job_id}/{stage}/replay",
            post(dead_letters::replay_dead_letter),
        )
        .route(
            "/{job_id}/{stage}/discard",
            post(dead_letters::discard_dead_letter),
        )
}
