//! Async storage contracts for the shared mutable pipeline state.
//!
//! Job records, checkpoint history, and dead-letter entries are versioned
//! records behind these traits rather than in-memory singletons. The
//! pipeline crate ships in-memory implementations with the same semantics
//! as the Postgres ones in the db crate, so orchestration logic and tests
//! are independent of the persistence backend.
//!
//! Concurrency contract:
//! - [`JobStore::update`] is a compare-and-swap on the job's version field.
//!   Callers read a job, mutate a copy with `version + 1`, and pass the
//!   version they read as `expected_version`; the store rejects the write
//!   with [`CoreError::VersionConflict`] if the stored version has advanced.
//! - [`CheckpointStore::write`] enforces monotonic sequence numbers per
//!   (job, stage) as its sole concurrency guard.

use async_trait::async_trait;

use crate::checkpoint::Checkpoint;
use crate::error::CoreError;
use crate::job::Job;
use crate::retry::DeadLetterEntry;
use crate::stage::Stage;
use crate::task::TaskKey;
use crate::types::JobId;

/// Durable store for job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a newly created job. Fails on duplicate id.
    async fn insert(&self, job: &Job) -> Result<(), CoreError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, CoreError>;

    /// Conditional write: succeeds only if the stored version equals
    /// `expected_version`. `job.version` must already be bumped by the
    /// caller.
    async fn update(&self, job: &Job, expected_version: u64) -> Result<(), CoreError>;

    /// All job records, newest first. Operator/listing surface.
    async fn list(&self) -> Result<Vec<Job>, CoreError>;
}

/// Append-only store for checkpoint history.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a record; rejects a seq not greater than the current latest
    /// for the same (job, stage) with [`CoreError::StaleCheckpoint`].
    async fn write(&self, checkpoint: &Checkpoint) -> Result<(), CoreError>;

    /// Most recent record for (job, stage), by seq.
    async fn latest(&self, job_id: JobId, stage: Stage) -> Result<Option<Checkpoint>, CoreError>;

    /// Full history for a job, ordered by stage then seq.
    async fn list_for_job(&self, job_id: JobId) -> Result<Vec<Checkpoint>, CoreError>;
}

/// Store for exhausted tasks awaiting operator action.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn push(&self, entry: &DeadLetterEntry) -> Result<(), CoreError>;

    async fn get(&self, key: TaskKey) -> Result<Option<DeadLetterEntry>, CoreError>;

    /// Remove an entry (replay or discard). Returns whether it existed.
    async fn remove(&self, key: TaskKey) -> Result<bool, CoreError>;

    async fn list(&self) -> Result<Vec<DeadLetterEntry>, CoreError>;
}
