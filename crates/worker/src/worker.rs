//! The worker loop: lease, execute, report.
//!
//! Protocol per task: report started, heartbeat by renewing the lease at
//! half the lease duration, run the executor, release the lease, then
//! report the outcome. The release happens before the outcome report so a
//! retry of the same task identity can be enqueued without tripping the
//! single-flight guard.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use parallax_core::error::CoreError;
use parallax_core::stage::ResourceClass;
use parallax_core::task::TaskOutcome;
use parallax_core::types::{LeaseId, WorkerId};
use parallax_pipeline::Orchestrator;
use parallax_queue::queue::LeasedTask;
use parallax_queue::TaskQueue;

use crate::executor::{ExecutionContext, StageExecutor};

/// Default lease duration; renewed at half this interval while executing.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(120);

/// How long an idle worker waits before polling the queue again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct Worker {
    id: WorkerId,
    class: ResourceClass,
    orchestrator: Arc<Orchestrator>,
    executor: Arc<dyn StageExecutor>,
    lease_duration: Duration,
    poll_interval: Duration,
    /// Fired when this worker's instance is being reclaimed.
    preempt: CancellationToken,
}

impl Worker {
    pub fn new(
        id: impl Into<WorkerId>,
        class: ResourceClass,
        orchestrator: Arc<Orchestrator>,
        executor: Arc<dyn StageExecutor>,
        preempt: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            class,
            orchestrator,
            executor,
            lease_duration: DEFAULT_LEASE_DURATION,
            poll_interval: DEFAULT_POLL_INTERVAL,
            preempt,
        }
    }

    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run until shutdown or preemption. A preempted worker finishes its
    /// current task (reporting it preempted) and then exits.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(worker_id = %self.id, class = %self.class, "Worker started");
        loop {
            if shutdown.is_cancelled() || self.preempt.is_cancelled() {
                break;
            }
            let leased = match self
                .orchestrator
                .queue()
                .lease(&self.id, self.class, self.lease_duration)
                .await
            {
                Ok(Some(leased)) => leased,
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.preempt.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                    continue;
                }
                Err(e) => {
                    tracing::error!(worker_id = %self.id, error = %e, "Lease attempt failed");
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };
            if let Err(e) = self.process(leased).await {
                tracing::error!(worker_id = %self.id, error = %e, "Task processing failed");
            }
        }
        tracing::info!(worker_id = %self.id, "Worker stopped");
    }

    async fn process(&self, leased: LeasedTask) -> Result<(), CoreError> {
        let task = leased.task;
        tracing::debug!(
            worker_id = %self.id,
            task = %task.key,
            attempt = task.attempt,
            "Executing stage"
        );
        self.orchestrator.on_task_started(task.key).await?;

        let heartbeat_stop = CancellationToken::new();
        let heartbeat = tokio::spawn(run_heartbeat(
            self.orchestrator.queue().clone(),
            leased.lease_id,
            self.lease_duration,
            heartbeat_stop.clone(),
        ));

        let cancel = self
            .orchestrator
            .cancel_token(task.key.job_id)
            .await
            .child_token();
        let outcome = self
            .executor
            .execute(ExecutionContext {
                job_id: task.key.job_id,
                stage: task.key.stage,
                attempt: task.attempt,
                inputs: task.inputs.clone(),
                resume_state: task.resume_state.clone(),
                degraded: task.degraded,
                cancel,
                preempt: self.preempt.child_token(),
            })
            .await;

        heartbeat_stop.cancel();
        let _ = heartbeat.await;

        // Release first: the orchestrator may immediately re-enqueue the
        // same task identity (retry, preemption). A lease the reaper already
        // claimed is gone; the outcome report below still goes through and
        // the orchestrator deduplicates it against the requeued copy.
        match self.orchestrator.queue().release(leased.lease_id).await {
            Ok(_) => {}
            Err(CoreError::LeaseNotFound(lease_id)) => {
                tracing::warn!(
                    worker_id = %self.id,
                    lease_id = %lease_id,
                    task = %task.key,
                    "Lease expired during execution, reporting the outcome anyway"
                );
            }
            Err(e) => return Err(e),
        }

        match outcome {
            TaskOutcome::Succeeded {
                outputs,
                checkpoint_state,
            } => {
                self.orchestrator
                    .on_task_succeeded(&task, outputs, checkpoint_state)
                    .await?;
            }
            TaskOutcome::Failed { class, message } => {
                self.orchestrator
                    .on_task_failed(&task, class, message)
                    .await?;
            }
            TaskOutcome::Aborted => self.orchestrator.on_task_aborted(&task).await?,
            TaskOutcome::Preempted { checkpoint_state } => {
                self.orchestrator
                    .on_task_preempted(&task, checkpoint_state)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Renew the lease at half its duration until stopped. A failed renewal
/// means the lease is gone (expired and reaped); the executor's outcome
/// report will then be deduplicated by the orchestrator.
async fn run_heartbeat(
    queue: Arc<TaskQueue>,
    lease_id: LeaseId,
    lease_duration: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(lease_duration / 2);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = queue.renew(lease_id, lease_duration).await {
                    tracing::warn!(lease_id = %lease_id, error = %e, "Lease renewal failed");
                    break;
                }
            }
        }
    }
}
