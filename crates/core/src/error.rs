use crate::job::JobStatus;
use crate::stage::Stage;
use crate::types::{JobId, LeaseId};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Lease not found or expired: {0}")]
    LeaseNotFound(LeaseId),

    #[error("Dead-letter entry not found for job {job_id} stage {stage}")]
    DeadLetterNotFound { job_id: JobId, stage: Stage },

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Duplicate task for job {job_id} stage {stage}")]
    DuplicateTask { job_id: JobId, stage: Stage },

    #[error("Stale checkpoint seq {seq} for job {job_id} stage {stage} (latest is {latest})")]
    StaleCheckpoint {
        job_id: JobId,
        stage: Stage,
        seq: u32,
        latest: u32,
    },

    #[error("Version conflict on job {0}")]
    VersionConflict(JobId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
