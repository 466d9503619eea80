//! The orchestrator: single writer of job state.
//!
//! Every lifecycle decision funnels through here. Workers lease tasks from
//! the queue, execute, release the lease, and then report the outcome to
//! one of the `on_task_*` methods; the orchestrator applies the state
//! machine, the retry policy, and the checkpoint protocol, and publishes
//! events for the notification dispatcher.
//!
//! Ordering guarantee: the task for stage N+1 is never enqueued before the
//! completion checkpoint write for stage N has returned.
//!
//! Cancellation is cooperative: `cancel` sets the job's cancel flag and
//! trips the job's cancellation token; executors are expected to observe
//! the token within their poll interval (at most 30 seconds) and release
//! with an aborted outcome, at which point the job is finalized.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use parallax_core::checkpoint::Checkpoint;
use parallax_core::error::CoreError;
use parallax_core::job::{state_machine, Job, JobStatus};
use parallax_core::retry::{next_backoff, should_retry, AttemptRecord, DeadLetterEntry, ErrorClass};
use parallax_core::stage::{definition, Stage};
use parallax_core::store::{CheckpointStore, DeadLetterStore, JobStore};
use parallax_core::task::{Task, TaskKey};
use parallax_core::types::{ArtifactRef, JobId, ProjectId};
use parallax_events::{EventBus, JobEvent};
use parallax_queue::TaskQueue;

use crate::memory::{MemoryCheckpointStore, MemoryDeadLetterStore, MemoryJobStore};

// ---------------------------------------------------------------------------
// Outcome reports
// ---------------------------------------------------------------------------

/// What a success report did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advancement {
    /// The job record had already moved past the stage; nothing changed.
    Duplicate,
    /// The next stage was enqueued.
    NextStage(Stage),
    /// That was the last stage; the job is complete.
    JobCompleted,
    /// A pending cancellation was finalized instead of advancing.
    CancelFinalized,
}

/// What a failure report did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Another attempt was scheduled after a backoff delay.
    Retried { attempt: u32, delay: Duration },
    /// The retry budget is spent (or the failure was permanent); the task
    /// was dead-lettered and the job marked failed.
    DeadLettered,
    /// A pending cancellation was finalized instead of retrying.
    CancelFinalized,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Whether the job record has already moved past `stage`. Terminal jobs
/// count as advanced; late reports against them change nothing.
fn advanced_past(job: &Job, stage: Stage) -> bool {
    job.is_terminal() || job.current_stage > stage.index()
}

pub struct Orchestrator {
    jobs: Arc<dyn JobStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    queue: Arc<TaskQueue>,
    bus: Arc<EventBus>,
    /// One token per live job, handed (as a child) to the running executor.
    cancel_tokens: Mutex<HashMap<JobId, CancellationToken>>,
    /// Failed-attempt records accumulated per task until dead-lettering.
    failure_history: Mutex<HashMap<TaskKey, Vec<AttemptRecord>>>,
}

impl Orchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        dead_letters: Arc<dyn DeadLetterStore>,
        queue: Arc<TaskQueue>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            jobs,
            checkpoints,
            dead_letters,
            queue,
            bus,
            cancel_tokens: Mutex::new(HashMap::new()),
            failure_history: Mutex::new(HashMap::new()),
        }
    }

    /// An orchestrator wired to fresh in-memory stores, queue, and bus.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(MemoryDeadLetterStore::new()),
            Arc::new(TaskQueue::new()),
            Arc::new(EventBus::default()),
        )
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // -----------------------------------------------------------------------
    // Submission and reads
    // -----------------------------------------------------------------------

    /// Create a job and enqueue its first stage.
    pub async fn submit(
        &self,
        project_id: ProjectId,
        input: ArtifactRef,
        priority: i32,
    ) -> Result<Job, CoreError> {
        let mut job = Job::new(project_id, input, priority);
        self.jobs.insert(&job).await?;

        let stage = Stage::ALL[0];
        state_machine::validate_transition(job.status, JobStatus::Queued)?;
        job.status = JobStatus::Queued;
        job.attempts[stage.index()] = 1;
        self.persist(&mut job).await?;

        let def = definition(stage);
        let task = Task::new(
            TaskKey::new(job.id, stage),
            1,
            vec![job.input.clone()],
            def.resource_class,
            job.priority,
        );
        self.queue.enqueue(task).await?;

        tracing::info!(job_id = %job.id, project_id = %job.project_id, "Job submitted");
        Ok(job)
    }

    pub async fn get_job(&self, id: JobId) -> Result<Job, CoreError> {
        self.load(id).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>, CoreError> {
        self.jobs.list().await
    }

    pub async fn checkpoints_for_job(&self, id: JobId) -> Result<Vec<Checkpoint>, CoreError> {
        // Surface JobNotFound rather than an empty history for unknown ids.
        self.load(id).await?;
        self.checkpoints.list_for_job(id).await
    }

    /// The cooperative cancellation token for a job. Workers take a child
    /// of this token into the executor.
    pub async fn cancel_token(&self, job_id: JobId) -> CancellationToken {
        self.cancel_tokens
            .lock()
            .await
            .entry(job_id)
            .or_default()
            .clone()
    }

    // -----------------------------------------------------------------------
    // Outcome reports (called by workers after releasing the lease)
    // -----------------------------------------------------------------------

    /// A worker started executing the task. Drives `Queued -> Running`.
    ///
    /// A second start report for the same stage (redelivery after a lease
    /// expired) is a no-op.
    pub async fn on_task_started(&self, key: TaskKey) -> Result<(), CoreError> {
        let mut job = self.load(key.job_id).await?;
        if job.status == JobStatus::Running {
            return Ok(());
        }
        state_machine::validate_transition(job.status, JobStatus::Running)?;
        job.status = JobStatus::Running;
        self.persist(&mut job).await?;
        tracing::debug!(job_id = %key.job_id, stage = %key.stage, "Stage execution started");
        Ok(())
    }

    /// A stage finished. Writes the completion checkpoint, then advances the
    /// job to the next stage or completes it.
    ///
    /// Idempotent on the job record: a report is a duplicate only when the
    /// job has already advanced past the stage (or reached a terminal
    /// status). A surviving completion checkpoint with an unadvanced job
    /// means an earlier report lost its job write, so the checkpoint write
    /// is skipped and the advance still runs. A `VersionConflict` on the
    /// advance (a concurrent cancel or pause racing this report) is retried
    /// once after re-reading the job.
    pub async fn on_task_succeeded(
        &self,
        task: &Task,
        outputs: Vec<ArtifactRef>,
        checkpoint_state: Option<serde_json::Value>,
    ) -> Result<Advancement, CoreError> {
        let key = task.key;
        let job = self.load(key.job_id).await?;
        if advanced_past(&job, key.stage) {
            tracing::info!(
                job_id = %key.job_id,
                stage = %key.stage,
                attempt = task.attempt,
                "Ignoring duplicate success report"
            );
            return Ok(Advancement::Duplicate);
        }

        let latest = self.checkpoints.latest(key.job_id, key.stage).await?;
        if !latest.as_ref().is_some_and(|c| c.complete) {
            let seq = latest.map_or(1, |c| c.seq + 1);
            let write = self
                .checkpoints
                .write(&Checkpoint::completed(
                    key.job_id,
                    key.stage,
                    seq,
                    outputs.clone(),
                    checkpoint_state,
                ))
                .await;
            match write {
                // A concurrent report won the write; the advance below
                // still settles the job record.
                Err(CoreError::StaleCheckpoint { .. }) => {}
                other => other?,
            }
        }

        match self.advance(task, &outputs).await {
            Err(CoreError::VersionConflict(id)) => {
                tracing::warn!(
                    job_id = %id,
                    stage = %key.stage,
                    "Version conflict advancing the job, re-reading and retrying"
                );
                self.advance(task, &outputs).await
            }
            other => other,
        }
    }

    /// Apply the post-success transition from a fresh read of the job:
    /// finalize a pending cancellation, complete the job after the last
    /// stage, or queue the next stage.
    async fn advance(&self, task: &Task, outputs: &[ArtifactRef]) -> Result<Advancement, CoreError> {
        let key = task.key;
        let mut job = self.load(key.job_id).await?;
        if advanced_past(&job, key.stage) {
            return Ok(Advancement::Duplicate);
        }
        if job.cancel_requested {
            self.finalize_cancel(job).await?;
            return Ok(Advancement::CancelFinalized);
        }

        job.attempts[key.stage.index()] = job.attempts_for(key.stage).max(task.attempt);
        match key.stage.next() {
            None => {
                state_machine::validate_transition(job.status, JobStatus::Completed)?;
                job.status = JobStatus::Completed;
                self.persist(&mut job).await?;
                self.bus
                    .publish(JobEvent::terminal(job.id, JobStatus::Completed));
                self.drop_token(job.id).await;
                tracing::info!(job_id = %job.id, "Job completed");
                Ok(Advancement::JobCompleted)
            }
            Some(next) => {
                job.current_stage = next.index();
                job.attempts[next.index()] = 1;
                state_machine::validate_transition(job.status, JobStatus::Queued)?;
                job.status = JobStatus::Queued;
                self.persist(&mut job).await?;

                let def = definition(next);
                let task = Task::new(
                    TaskKey::new(job.id, next),
                    1,
                    outputs.to_vec(),
                    def.resource_class,
                    job.priority,
                );
                self.queue.enqueue(task).await?;
                self.bus.publish(JobEvent::stage_completed(
                    job.id,
                    JobStatus::Queued,
                    key.stage,
                ));
                tracing::info!(
                    job_id = %job.id,
                    completed = %key.stage,
                    next = %next,
                    "Stage completed, next stage enqueued"
                );
                Ok(Advancement::NextStage(next))
            }
        }
    }

    /// A stage failed. Consults the retry policy: either re-enqueues the
    /// next attempt with exponential backoff or dead-letters the task and
    /// fails the job. A `VersionConflict` (a concurrent cancel racing the
    /// report) is retried once after re-reading the job.
    pub async fn on_task_failed(
        &self,
        task: &Task,
        class: ErrorClass,
        message: String,
    ) -> Result<FailureDisposition, CoreError> {
        self.failure_history
            .lock()
            .await
            .entry(task.key)
            .or_default()
            .push(AttemptRecord {
                attempt: task.attempt,
                class,
                message: message.clone(),
                failed_at: chrono::Utc::now(),
            });

        match self.settle_failure(task, class, &message).await {
            Err(CoreError::VersionConflict(id)) => {
                tracing::warn!(
                    job_id = %id,
                    stage = %task.key.stage,
                    "Version conflict settling the failure, re-reading and retrying"
                );
                self.settle_failure(task, class, &message).await
            }
            other => other,
        }
    }

    /// Apply the failure disposition from a fresh read of the job.
    async fn settle_failure(
        &self,
        task: &Task,
        class: ErrorClass,
        message: &str,
    ) -> Result<FailureDisposition, CoreError> {
        let key = task.key;
        let mut job = self.load(key.job_id).await?;
        if job.cancel_requested {
            self.finalize_cancel(job).await?;
            return Ok(FailureDisposition::CancelFinalized);
        }

        job.last_error_class = Some(class);
        job.last_error = Some(message.to_string());

        let def = definition(key.stage);
        if should_retry(&def, task.attempt, class) {
            let delay = next_backoff(task.attempt, def.base_backoff);
            job.attempts[key.stage.index()] = task.attempt + 1;
            state_machine::validate_transition(job.status, JobStatus::Queued)?;
            job.status = JobStatus::Queued;
            self.persist(&mut job).await?;

            let mut retry = task.clone();
            retry.attempt += 1;
            // OOM hint: the next attempt should request a reduced footprint.
            retry.degraded = class == ErrorClass::ResourceExhausted;
            if def.resumable {
                retry.resume_state = self
                    .checkpoints
                    .latest(key.job_id, key.stage)
                    .await?
                    .and_then(|c| c.state);
            }
            self.queue.enqueue_after(retry, delay).await?;

            tracing::warn!(
                job_id = %key.job_id,
                stage = %key.stage,
                attempt = task.attempt,
                class = %class,
                delay_secs = delay.as_secs(),
                "Stage failed, retry scheduled"
            );
            Ok(FailureDisposition::Retried {
                attempt: task.attempt + 1,
                delay,
            })
        } else {
            // The history entry is dropped only after the job write lands,
            // so a retried settlement still sees the full record.
            let history = self
                .failure_history
                .lock()
                .await
                .get(&key)
                .cloned()
                .unwrap_or_default();
            self.dead_letters
                .push(&DeadLetterEntry {
                    key,
                    last_error: message.to_string(),
                    last_class: class,
                    attempt_history: history,
                    enqueued_at: chrono::Utc::now(),
                })
                .await?;

            state_machine::validate_transition(job.status, JobStatus::Failed)?;
            job.status = JobStatus::Failed;
            self.persist(&mut job).await?;
            self.failure_history.lock().await.remove(&key);
            self.bus.publish(
                JobEvent::terminal(job.id, JobStatus::Failed)
                    .with_stage(key.stage)
                    .with_error_summary(message.to_string()),
            );
            self.drop_token(job.id).await;

            tracing::error!(
                job_id = %key.job_id,
                stage = %key.stage,
                attempt = task.attempt,
                class = %class,
                "Stage failed permanently, task dead-lettered"
            );
            Ok(FailureDisposition::DeadLettered)
        }
    }

    /// The executor observed the cancellation token and stopped. Finalizes
    /// the pending cancellation; a no-op if the job is already terminal.
    pub async fn on_task_aborted(&self, task: &Task) -> Result<(), CoreError> {
        let job = self.load(task.key.job_id).await?;
        if job.is_terminal() {
            return Ok(());
        }
        match self.finalize_cancel(job).await {
            Err(CoreError::VersionConflict(_)) => {
                let job = self.load(task.key.job_id).await?;
                if job.is_terminal() {
                    return Ok(());
                }
                self.finalize_cancel(job).await
            }
            other => other,
        }
    }

    /// The worker's instance is being reclaimed. Persists partial progress
    /// when the stage supports it and re-enqueues the same attempt; the
    /// preemption does not consume retry budget. A `VersionConflict` on the
    /// requeue is retried once after re-reading the job.
    pub async fn on_task_preempted(
        &self,
        task: &Task,
        checkpoint_state: Option<serde_json::Value>,
    ) -> Result<(), CoreError> {
        let key = task.key;
        let job = self.load(key.job_id).await?;
        if job.cancel_requested {
            return self.finalize_cancel(job).await;
        }

        let def = definition(key.stage);
        let mut resume_state = task.resume_state.clone();
        if def.resumable {
            if let Some(state) = checkpoint_state {
                let seq = self
                    .checkpoints
                    .latest(key.job_id, key.stage)
                    .await?
                    .map_or(1, |c| c.seq + 1);
                self.checkpoints
                    .write(&Checkpoint::partial(key.job_id, key.stage, seq, state.clone()))
                    .await?;
                resume_state = Some(state);
            }
        }

        match self.requeue_preempted(task, resume_state.clone()).await {
            Err(CoreError::VersionConflict(id)) => {
                tracing::warn!(
                    job_id = %id,
                    stage = %key.stage,
                    "Version conflict requeueing the preempted task, re-reading and retrying"
                );
                self.requeue_preempted(task, resume_state).await
            }
            other => other,
        }
    }

    /// Re-enqueue a preempted task from a fresh read of the job.
    async fn requeue_preempted(
        &self,
        task: &Task,
        resume_state: Option<serde_json::Value>,
    ) -> Result<(), CoreError> {
        let key = task.key;
        let mut job = self.load(key.job_id).await?;
        if job.cancel_requested {
            return self.finalize_cancel(job).await;
        }

        job.last_error_class = Some(ErrorClass::Preempted);
        state_machine::validate_transition(job.status, JobStatus::Queued)?;
        job.status = JobStatus::Queued;
        self.persist(&mut job).await?;

        let mut requeued = task.clone();
        requeued.resume_state = resume_state;
        self.queue.enqueue(requeued).await?;

        tracing::warn!(
            job_id = %key.job_id,
            stage = %key.stage,
            attempt = task.attempt,
            "Task preempted, re-enqueued without consuming an attempt"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Operator actions
    // -----------------------------------------------------------------------

    /// Request cancellation.
    ///
    /// A job with no in-flight execution (pending, paused, or still queued)
    /// is cancelled immediately. A job whose task is leased keeps running
    /// until the executor observes the token; until then the returned job
    /// carries `cancel_requested` with a non-terminal status.
    pub async fn cancel(&self, job_id: JobId) -> Result<Job, CoreError> {
        let mut job = self.load(job_id).await?;
        if job.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "job {} is already {}",
                job.id, job.status
            )));
        }

        job.cancel_requested = true;
        let withdrawn = match job.stage() {
            Some(stage) => self.queue.remove(TaskKey::new(job.id, stage)).await?,
            None => false,
        };

        if withdrawn || matches!(job.status, JobStatus::Pending | JobStatus::Paused) {
            state_machine::validate_transition(job.status, JobStatus::Cancelled)?;
            job.status = JobStatus::Cancelled;
            self.persist(&mut job).await?;
            self.bus
                .publish(JobEvent::terminal(job.id, JobStatus::Cancelled));
            self.drop_token(job.id).await;
            tracing::info!(job_id = %job.id, "Job cancelled");
        } else {
            // Leased: flag it and trip the token; the abort report finalizes.
            self.persist(&mut job).await?;
            self.cancel_token(job.id).await.cancel();
            tracing::info!(job_id = %job.id, "Cancellation requested, waiting for executor");
        }
        Ok(job)
    }

    /// Withdraw a queued job from dispatch. Only queued (not leased) jobs
    /// can be paused; a leased task belongs to its worker until released.
    pub async fn pause(&self, job_id: JobId) -> Result<Job, CoreError> {
        let mut job = self.load(job_id).await?;
        if job.status != JobStatus::Queued {
            return Err(CoreError::Conflict(format!(
                "cannot pause a {} job",
                job.status
            )));
        }
        let stage = job
            .stage()
            .ok_or_else(|| CoreError::Internal("queued job has no pending stage".into()))?;
        if !self.queue.remove(TaskKey::new(job.id, stage)).await? {
            return Err(CoreError::Conflict(
                "task is already leased to a worker".into(),
            ));
        }
        state_machine::validate_transition(job.status, JobStatus::Paused)?;
        job.status = JobStatus::Paused;
        self.persist(&mut job).await?;
        tracing::info!(job_id = %job.id, "Job paused");
        Ok(job)
    }

    /// Re-enqueue a paused or failed job at its pending stage.
    ///
    /// The stage's attempt budget is reset, its dead-letter entry (if any)
    /// is cleared, and the task seeds from the latest checkpoint for
    /// resumable stages.
    pub async fn resume(&self, job_id: JobId) -> Result<Job, CoreError> {
        let mut job = self.load(job_id).await?;
        if !matches!(job.status, JobStatus::Paused | JobStatus::Failed) {
            return Err(CoreError::Conflict(format!(
                "cannot resume a {} job",
                job.status
            )));
        }
        let stage = job
            .stage()
            .ok_or_else(|| CoreError::Internal("resumed job has no pending stage".into()))?;
        let key = TaskKey::new(job.id, stage);

        self.dead_letters.remove(key).await?;
        self.failure_history.lock().await.remove(&key);

        job.attempts[stage.index()] = 1;
        job.last_error = None;
        job.last_error_class = None;
        job.cancel_requested = false;
        state_machine::validate_transition(job.status, JobStatus::Queued)?;
        job.status = JobStatus::Queued;
        self.persist(&mut job).await?;

        let def = definition(stage);
        let inputs = self.stage_inputs(&job, stage).await?;
        let mut task = Task::new(key, 1, inputs, def.resource_class, job.priority);
        if def.resumable {
            task.resume_state = self
                .checkpoints
                .latest(job.id, stage)
                .await?
                .and_then(|c| c.state);
        }
        self.queue.enqueue(task).await?;

        tracing::info!(job_id = %job.id, stage = %stage, "Job resumed");
        Ok(job)
    }

    // -----------------------------------------------------------------------
    // Dead-letter operations
    // -----------------------------------------------------------------------

    pub async fn list_dead_letters(&self) -> Result<Vec<DeadLetterEntry>, CoreError> {
        self.dead_letters.list().await
    }

    /// Replay a dead-lettered task: clears the entry and resumes the job at
    /// the failed stage with a fresh attempt budget.
    pub async fn replay_dead_letter(&self, key: TaskKey) -> Result<Job, CoreError> {
        let entry = self
            .dead_letters
            .get(key)
            .await?
            .ok_or(CoreError::DeadLetterNotFound {
                job_id: key.job_id,
                stage: key.stage,
            })?;
        self.resume(entry.key.job_id).await
    }

    /// Drop a dead-letter entry without retrying. The job stays failed.
    pub async fn discard_dead_letter(&self, key: TaskKey) -> Result<(), CoreError> {
        if !self.dead_letters.remove(key).await? {
            return Err(CoreError::DeadLetterNotFound {
                job_id: key.job_id,
                stage: key.stage,
            });
        }
        tracing::info!(task = %key, "Dead-letter entry discarded");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn load(&self, id: JobId) -> Result<Job, CoreError> {
        self.jobs
            .get(id)
            .await?
            .ok_or(CoreError::JobNotFound(id))
    }

    /// Bump the version and write through the store's compare-and-swap.
    async fn persist(&self, job: &mut Job) -> Result<(), CoreError> {
        let expected = job.version;
        job.version += 1;
        job.updated_at = chrono::Utc::now();
        self.jobs.update(job, expected).await
    }

    async fn finalize_cancel(&self, mut job: Job) -> Result<(), CoreError> {
        state_machine::validate_transition(job.status, JobStatus::Cancelled)?;
        job.status = JobStatus::Cancelled;
        self.persist(&mut job).await?;
        self.bus
            .publish(JobEvent::terminal(job.id, JobStatus::Cancelled));
        self.drop_token(job.id).await;
        tracing::info!(job_id = %job.id, "Job cancelled");
        Ok(())
    }

    async fn drop_token(&self, job_id: JobId) {
        if let Some(token) = self.cancel_tokens.lock().await.remove(&job_id) {
            token.cancel();
        }
    }

    /// Inputs for a stage: the job's input artifact for the first stage,
    /// the previous stage's checkpointed outputs otherwise.
    async fn stage_inputs(&self, job: &Job, stage: Stage) -> Result<Vec<ArtifactRef>, CoreError> {
        let index = stage.index();
        if index == 0 {
            return Ok(vec![job.input.clone()]);
        }
        let prev = Stage::at(index - 1)
            .ok_or_else(|| CoreError::Internal("stage index out of range".into()))?;
        let checkpoint = self
            .checkpoints
            .latest(job.id, prev)
            .await?
            .filter(|c| c.complete)
            .ok_or_else(|| {
                CoreError::Internal(format!(
                    "job {} stage {} has no completed upstream checkpoint",
                    job.id, stage
                ))
            })?;
        Ok(checkpoint.outputs)
    }
}
