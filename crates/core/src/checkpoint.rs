//! Immutable stage progress records.
//!
//! A checkpoint is written when a stage completes, and optionally at
//! mid-execution save points for resumable stages (preemption, long
//! training runs). Records are never mutated; the latest sequence number
//! per (job, stage) determines the resume point, and monotonic sequence
//! numbers are the store's sole concurrency guard against straggling
//! duplicate executions.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::stage::Stage;
use crate::types::{ArtifactRef, JobId, Timestamp};

/// One durable progress record for (job, stage).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job_id: JobId,
    pub stage: Stage,
    /// Monotonically increasing per (job, stage), starting at 1.
    pub seq: u32,
    /// Whether this record marks stage completion (vs. partial progress).
    pub complete: bool,
    /// Opaque resumable executor state (training iteration, frame cursor).
    pub state: Option<serde_json::Value>,
    /// Output artifact references; populated on completion checkpoints.
    pub outputs: Vec<ArtifactRef>,
    pub created_at: Timestamp,
}

impl Checkpoint {
    /// A completion marker carrying the stage's outputs.
    pub fn completed(
        job_id: JobId,
        stage: Stage,
        seq: u32,
        outputs: Vec<ArtifactRef>,
        state: Option<serde_json::Value>,
    ) -> Self {
        Self {
            job_id,
            stage,
            seq,
            complete: true,
            state,
            outputs,
            created_at: chrono::Utc::now(),
        }
    }

    /// A partial save point written mid-execution (preemption, periodic save).
    pub fn partial(
        job_id: JobId,
        stage: Stage,
        seq: u32,
        state: serde_json::Value,
    ) -> Self {
        Self {
            job_id,
            stage,
            seq,
            complete: false,
            state: Some(state),
            outputs: Vec::new(),
            created_at: chrono::Utc::now(),
        }
    }
}

/// Reject a write whose seq does not advance past the current latest.
pub fn validate_seq(
    job_id: JobId,
    stage: Stage,
    seq: u32,
    latest: Option<u32>,
) -> Result<(), CoreError> {
    match latest {
        Some(latest) if seq <= latest => Err(CoreError::StaleCheckpoint {
            job_id,
            stage,
            seq,
            latest,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_write_accepts_any_positive_seq() {
        let id = uuid::Uuid::new_v4();
        assert!(validate_seq(id, Stage::Reconstruct, 1, None).is_ok());
        assert!(validate_seq(id, Stage::Reconstruct, 7, None).is_ok());
    }

    #[test]
    fn stale_seq_is_rejected() {
        let id = uuid::Uuid::new_v4();
        let err = validate_seq(id, Stage::Reconstruct, 2, Some(2)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::StaleCheckpoint { seq: 2, latest: 2, .. }
        ));
        assert!(validate_seq(id, Stage::Reconstruct, 1, Some(2)).is_err());
    }

    #[test]
    fn advancing_seq_is_accepted() {
        let id = uuid::Uuid::new_v4();
        assert!(validate_seq(id, Stage::Optimize, 3, Some(2)).is_ok());
    }

    #[test]
    fn completion_and_partial_constructors() {
        let id = uuid::Uuid::new_v4();
        let done = Checkpoint::completed(
            id,
            Stage::Package,
            1,
            vec![ArtifactRef::from("s3://tours/bundle.tar")],
            None,
        );
        assert!(done.complete);
        assert_eq!(done.outputs.len(), 1);

        let partial = Checkpoint::partial(
            id,
            Stage::Reconstruct,
            1,
            serde_json::json!({"iteration": 15_000}),
        );
        assert!(!partial.complete);
        assert!(partial.outputs.is_empty());
        assert_eq!(partial.state.unwrap()["iteration"], 15_000);
    }
}
