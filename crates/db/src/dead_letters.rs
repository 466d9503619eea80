//! The `dead_letters` table, keyed by (job, stage).

use async_trait::async_trait;
use sqlx::PgPool;

use parallax_core::error::CoreError;
use parallax_core::retry::{AttemptRecord, DeadLetterEntry, ErrorClass};
use parallax_core::stage::Stage;
use parallax_core::store::DeadLetterStore;
use parallax_core::task::TaskKey;
use parallax_core::types::{JobId, Timestamp};

use crate::storage_err;

/// Column list for `dead_letters` queries.
const COLUMNS: &str = "job_id, stage, last_error, last_class, attempt_history, enqueued_at";

#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    job_id: JobId,
    stage: String,
    last_error: String,
    last_class: String,
    attempt_history: serde_json::Value,
    enqueued_at: Timestamp,
}

impl TryFrom<DeadLetterRow> for DeadLetterEntry {
    type Error = CoreError;

    fn try_from(row: DeadLetterRow) -> Result<Self, CoreError> {
        let stage = Stage::from_name(&row.stage)
            .ok_or_else(|| CoreError::Storage(format!("unknown stage '{}'", row.stage)))?;
        let attempt_history: Vec<AttemptRecord> = serde_json::from_value(row.attempt_history)
            .map_err(|e| CoreError::Storage(format!("bad attempt history: {e}")))?;
        Ok(DeadLetterEntry {
            key: TaskKey::new(row.job_id, stage),
            last_error: row.last_error,
            last_class: ErrorClass::from_str(&row.last_class),
            attempt_history,
            enqueued_at: row.enqueued_at,
        })
    }
}

pub struct PgDeadLetterStore {
    pool: PgPool,
}

impl PgDeadLetterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterStore for PgDeadLetterStore {
    async fn push(&self, entry: &DeadLetterEntry) -> Result<(), CoreError> {
        let history = serde_json::to_value(&entry.attempt_history)
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        // Replaying and re-exhausting the same stage overwrites the entry.
        sqlx::query(
            "INSERT INTO dead_letters (job_id, stage, last_error, last_class, attempt_history, enqueued_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (job_id, stage) DO UPDATE SET \
                 last_error = EXCLUDED.last_error, \
                 last_class = EXCLUDED.last_class, \
                 attempt_history = EXCLUDED.attempt_history, \
                 enqueued_at = EXCLUDED.enqueued_at",
        )
        .bind(entry.key.job_id)
        .bind(entry.key.stage.as_str())
        .bind(&entry.last_error)
        .bind(entry.last_class.as_str())
        .bind(history)
        .bind(entry.enqueued_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get(&self, key: TaskKey) -> Result<Option<DeadLetterEntry>, CoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM dead_letters WHERE job_id = $1 AND stage = $2"
        );
        let row = sqlx::query_as::<_, DeadLetterRow>(&query)
            .bind(key.job_id)
            .bind(key.stage.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(DeadLetterEntry::try_from).transpose()
    }

    async fn remove(&self, key: TaskKey) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM dead_letters WHERE job_id = $1 AND stage = $2")
            .bind(key.job_id)
            .bind(key.stage.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<DeadLetterEntry>, CoreError> {
        let query = format!("SELECT {COLUMNS} FROM dead_letters ORDER BY enqueued_at ASC");
        let rows = sqlx::query_as::<_, DeadLetterRow>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.into_iter().map(DeadLetterEntry::try_from).collect()
    }
}
