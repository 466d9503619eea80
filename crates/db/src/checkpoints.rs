//! The append-only `checkpoints` table.

use async_trait::async_trait;
use sqlx::PgPool;

use parallax_core::checkpoint::Checkpoint;
use parallax_core::error::CoreError;
use parallax_core::stage::Stage;
use parallax_core::store::CheckpointStore;
use parallax_core::types::{ArtifactRef, JobId, Timestamp};

use crate::storage_err;

/// Column list for `checkpoints` queries.
const COLUMNS: &str = "job_id, stage, seq, complete, state, outputs, created_at";

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    job_id: JobId,
    stage: String,
    seq: i32,
    complete: bool,
    state: Option<serde_json::Value>,
    outputs: Vec<String>,
    created_at: Timestamp,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = CoreError;

    fn try_from(row: CheckpointRow) -> Result<Self, CoreError> {
        let stage = Stage::from_name(&row.stage)
            .ok_or_else(|| CoreError::Storage(format!("unknown stage '{}'", row.stage)))?;
        Ok(Checkpoint {
            job_id: row.job_id,
            stage,
            seq: row.seq.max(0) as u32,
            complete: row.complete,
            state: row.state,
            outputs: row.outputs.into_iter().map(ArtifactRef::new).collect(),
            created_at: row.created_at,
        })
    }
}

pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    /// The guarded insert only lands when no record with an equal or
    /// higher seq exists for the same (job, stage); a zero-row result is
    /// reported as a stale checkpoint with the current latest seq.
    async fn write(&self, checkpoint: &Checkpoint) -> Result<(), CoreError> {
        let outputs: Vec<&str> = checkpoint.outputs.iter().map(ArtifactRef::as_str).collect();
        let result = sqlx::query(
            "INSERT INTO checkpoints (job_id, stage, seq, complete, state, outputs, created_at) \
             SELECT $1, $2, $3, $4, $5, $6, $7 \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM checkpoints \
                 WHERE job_id = $1 AND stage = $2 AND seq >= $3 \
             )",
        )
        .bind(checkpoint.job_id)
        .bind(checkpoint.stage.as_str())
        .bind(checkpoint.seq as i32)
        .bind(checkpoint.complete)
        .bind(&checkpoint.state)
        .bind(&outputs)
        .bind(checkpoint.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        let latest: Option<i32> = sqlx::query_scalar(
            "SELECT MAX(seq) FROM checkpoints WHERE job_id = $1 AND stage = $2",
        )
        .bind(checkpoint.job_id)
        .bind(checkpoint.stage.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;
        Err(CoreError::StaleCheckpoint {
            job_id: checkpoint.job_id,
            stage: checkpoint.stage,
            seq: checkpoint.seq,
            latest: latest.unwrap_or(0).max(0) as u32,
        })
    }

    async fn latest(&self, job_id: JobId, stage: Stage) -> Result<Option<Checkpoint>, CoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM checkpoints \
             WHERE job_id = $1 AND stage = $2 \
             ORDER BY seq DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, CheckpointRow>(&query)
            .bind(job_id)
            .bind(stage.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(Checkpoint::try_from).transpose()
    }

    async fn list_for_job(&self, job_id: JobId) -> Result<Vec<Checkpoint>, CoreError> {
        let query = format!("SELECT {COLUMNS} FROM checkpoints WHERE job_id = $1");
        let rows = sqlx::query_as::<_, CheckpointRow>(&query)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        let mut checkpoints: Vec<Checkpoint> = rows
            .into_iter()
            .map(Checkpoint::try_from)
            .collect::<Result<_, _>>()?;
        // Stage order is pipeline order, not the stage names' sort order.
        checkpoints.sort_by_key(|c| (c.stage.index(), c.seq));
        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_maps_to_domain_checkpoint() {
        let row = CheckpointRow {
            job_id: uuid::Uuid::new_v4(),
            stage: "reconstruct".into(),
            seq: 2,
            complete: false,
            state: Some(serde_json::json!({"iteration": 15_000})),
            outputs: vec!["s3://splats/model.ply".into()],
            created_at: chrono::Utc::now(),
        };
        let checkpoint = Checkpoint::try_from(row).unwrap();
        assert_eq!(checkpoint.stage, Stage::Reconstruct);
        assert_eq!(checkpoint.seq, 2);
        assert!(!checkpoint.complete);
        assert_eq!(checkpoint.outputs[0].as_str(), "s3://splats/model.ply");
    }

    #[test]
    fn unknown_stage_is_a_storage_error() {
        let row = CheckpointRow {
            job_id: uuid::Uuid::new_v4(),
            stage: "render".into(),
            seq: 1,
            complete: true,
            state: None,
            outputs: vec![],
            created_at: chrono::Utc::now(),
        };
        assert!(matches!(
            Checkpoint::try_from(row),
            Err(CoreError::Storage(_))
        ));
    }
}
