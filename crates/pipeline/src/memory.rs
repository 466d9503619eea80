//! In-memory store implementations.
//!
//! Semantics match the Postgres implementations in the db crate exactly:
//! versioned compare-and-swap job updates, append-only checkpoints with a
//! monotonic-seq insert guard, dead letters keyed by task identity. Tests
//! and single-process deployments run against these.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use parallax_core::checkpoint::{validate_seq, Checkpoint};
use parallax_core::error::CoreError;
use parallax_core::job::Job;
use parallax_core::retry::DeadLetterEntry;
use parallax_core::stage::Stage;
use parallax_core::store::{CheckpointStore, DeadLetterStore, JobStore};
use parallax_core::task::TaskKey;
use parallax_core::types::JobId;

// ---------------------------------------------------------------------------
// MemoryJobStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), CoreError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Err(CoreError::Conflict(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, CoreError> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn update(&self, job: &Job, expected_version: u64) -> Result<(), CoreError> {
        let mut jobs = self.jobs.lock().await;
        let stored = jobs
            .get_mut(&job.id)
            .ok_or(CoreError::JobNotFound(job.id))?;
        if stored.version != expected_version {
            return Err(CoreError::VersionConflict(job.id));
        }
        *stored = job.clone();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Job>, CoreError> {
        let jobs = self.jobs.lock().await;
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}

// ---------------------------------------------------------------------------
// MemoryCheckpointStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<JobId, Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn latest_of(records: &[Checkpoint], stage: Stage) -> Option<&Checkpoint> {
    records
        .iter()
        .filter(|c| c.stage == stage)
        .max_by_key(|c| c.seq)
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn write(&self, checkpoint: &Checkpoint) -> Result<(), CoreError> {
        let mut checkpoints = self.checkpoints.lock().await;
        let records = checkpoints.entry(checkpoint.job_id).or_default();
        let latest = latest_of(records, checkpoint.stage).map(|c| c.seq);
        validate_seq(checkpoint.job_id, checkpoint.stage, checkpoint.seq, latest)?;
        records.push(checkpoint.clone());
        Ok(())
    }

    async fn latest(&self, job_id: JobId, stage: Stage) -> Result<Option<Checkpoint>, CoreError> {
        let checkpoints = self.checkpoints.lock().await;
        Ok(checkpoints
            .get(&job_id)
            .and_then(|records| latest_of(records, stage).cloned()))
    }

    async fn list_for_job(&self, job_id: JobId) -> Result<Vec<Checkpoint>, CoreError> {
        let checkpoints = self.checkpoints.lock().await;
        let mut records = checkpoints.get(&job_id).cloned().unwrap_or_default();
        records.sort_by_key(|c| (c.stage.index(), c.seq));
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// MemoryDeadLetterStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryDeadLetterStore {
    entries: Mutex<HashMap<TaskKey, DeadLetterEntry>>,
}

impl MemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterStore for MemoryDeadLetterStore {
    async fn push(&self, entry: &DeadLetterEntry) -> Result<(), CoreError> {
        self.entries
            .lock()
            .await
            .insert(entry.key, entry.clone());
        Ok(())
    }

    async fn get(&self, key: TaskKey) -> Result<Option<DeadLetterEntry>, CoreError> {
        Ok(self.entries.lock().await.get(&key).cloned())
    }

    async fn remove(&self, key: TaskKey) -> Result<bool, CoreError> {
        Ok(self.entries.lock().await.remove(&key).is_some())
    }

    async fn list(&self) -> Result<Vec<DeadLetterEntry>, CoreError> {
        let entries = self.entries.lock().await;
        let mut all: Vec<DeadLetterEntry> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        Ok(all)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
