//! The `jobs` table.

use async_trait::async_trait;
use sqlx::PgPool;

use parallax_core::error::CoreError;
use parallax_core::job::{Job, JobStatus};
use parallax_core::retry::ErrorClass;
use parallax_core::stage::Stage;
use parallax_core::store::JobStore;
use parallax_core::types::{ArtifactRef, JobId, Timestamp};

use crate::storage_err;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, project_id, input, status, current_stage, attempts, priority, \
    cancel_requested, last_error_class, last_error, version, \
    created_at, updated_at";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: JobId,
    project_id: uuid::Uuid,
    input: String,
    status: String,
    current_stage: i32,
    attempts: Vec<i32>,
    priority: i32,
    cancel_requested: bool,
    last_error_class: Option<String>,
    last_error: Option<String>,
    version: i64,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl TryFrom<JobRow> for Job {
    type Error = CoreError;

    fn try_from(row: JobRow) -> Result<Self, CoreError> {
        let status = JobStatus::from_name(&row.status)
            .ok_or_else(|| CoreError::Storage(format!("unknown job status '{}'", row.status)))?;
        let mut attempts = [0u32; Stage::COUNT];
        for (slot, value) in attempts.iter_mut().zip(row.attempts.iter()) {
            *slot = (*value).max(0) as u32;
        }
        Ok(Job {
            id: row.id,
            project_id: row.project_id,
            input: ArtifactRef::new(row.input),
            status,
            current_stage: row.current_stage.max(0) as usize,
            attempts,
            priority: row.priority,
            cancel_requested: row.cancel_requested,
            last_error_class: row.last_error_class.as_deref().map(ErrorClass::from_str),
            last_error: row.last_error,
            version: row.version.max(0) as u64,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn attempts_to_vec(job: &Job) -> Vec<i32> {
    job.attempts.iter().map(|a| *a as i32).collect()
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &Job) -> Result<(), CoreError> {
        let query = format!(
            "INSERT INTO jobs ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        );
        sqlx::query(&query)
            .bind(job.id)
            .bind(job.project_id)
            .bind(job.input.as_str())
            .bind(job.status.as_str())
            .bind(job.current_stage as i32)
            .bind(attempts_to_vec(job))
            .bind(job.priority)
            .bind(job.cancel_requested)
            .bind(job.last_error_class.map(|c| c.as_str()))
            .bind(job.last_error.as_deref())
            .bind(job.version as i64)
            .bind(job.created_at)
            .bind(job.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    CoreError::Conflict(format!("job {} already exists", job.id))
                }
                _ => storage_err(e),
            })?;
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, CoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(Job::try_from).transpose()
    }

    /// Conditional write: `WHERE version = expected` makes the update a
    /// compare-and-swap. Zero rows affected means either a lost race or a
    /// missing job; a follow-up existence probe tells the two apart.
    async fn update(&self, job: &Job, expected_version: u64) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET \
                 status = $2, current_stage = $3, attempts = $4, \
                 cancel_requested = $5, last_error_class = $6, last_error = $7, \
                 version = $8, updated_at = $9 \
             WHERE id = $1 AND version = $10",
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(job.current_stage as i32)
        .bind(attempts_to_vec(job))
        .bind(job.cancel_requested)
        .bind(job.last_error_class.map(|c| c.as_str()))
        .bind(job.last_error.as_deref())
        .bind(job.version as i64)
        .bind(job.updated_at)
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        let exists = sqlx::query("SELECT 1 FROM jobs WHERE id = $1")
            .bind(job.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?
            .is_some();
        if exists {
            Err(CoreError::VersionConflict(job.id))
        } else {
            Err(CoreError::JobNotFound(job.id))
        }
    }

    async fn list(&self) -> Result<Vec<Job>, CoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs ORDER BY created_at DESC");
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.into_iter().map(Job::try_from).collect()
    }
}
