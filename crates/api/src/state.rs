use std::sync::Arc;

use parallax_pipeline::Orchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The single writer of job state. Handlers never touch the stores
    /// directly.
    pub orchestrator: Arc<Orchestrator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Database pool, present when running against Postgres. `None` in
    /// in-memory mode.
    pub pool: Option<sqlx::PgPool>,
}
