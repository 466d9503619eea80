//! Postgres implementations of the core store traits.
//!
//! Same contracts as the in-memory stores in the pipeline crate: job
//! updates are compare-and-swap on the version column, checkpoint inserts
//! carry a monotonic-seq guard, dead letters are keyed by task identity.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub mod checkpoints;
pub mod dead_letters;
pub mod jobs;

pub use checkpoints::PgCheckpointStore;
pub use dead_letters::PgDeadLetterStore;
pub use jobs::PgJobStore;

use parallax_core::error::CoreError;

/// Default maximum connections in the pool.
const MAX_CONNECTIONS: u32 = 10;

/// Connect to Postgres and run pending migrations.
pub async fn create_pool(database_url: &str) -> Result<PgPool, CoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect(database_url)
        .await
        .map_err(storage_err)?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| CoreError::Storage(e.to_string()))?;
    tracing::info!("Database pool ready");
    Ok(pool)
}

/// Cheap connectivity probe for health endpoints.
pub async fn health_check(pool: &PgPool) -> Result<(), CoreError> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(storage_err)?;
    Ok(())
}

pub(crate) fn storage_err(e: sqlx::Error) -> CoreError {
    CoreError::Storage(e.to_string())
}
