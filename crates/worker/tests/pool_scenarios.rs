//! Worker pool scenarios: end-to-end execution, cancellation, preemption,
//! and queue-depth autoscaling against the in-memory orchestrator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use parallax_core::autoscale::ScalePolicy;
use parallax_core::job::{Job, JobStatus};
use parallax_core::stage::{ResourceClass, Stage};
use parallax_core::task::{Task, TaskKey, TaskOutcome, PRIORITY_STANDARD};
use parallax_core::types::ArtifactRef;
use parallax_pipeline::Orchestrator;
use parallax_worker::{
    Autoscaler, ExecutionContext, SimulatedExecutor, StageExecutor, WorkerPool,
};

const FAST_POLL: Duration = Duration::from_millis(10);
const LEASE: Duration = Duration::from_secs(5);

async fn submit(orc: &Orchestrator) -> Job {
    orc.submit(
        uuid::Uuid::new_v4(),
        ArtifactRef::from("scan://capture.mp4"),
        PRIORITY_STANDARD,
    )
    .await
    .unwrap()
}

async fn wait_until(
    orc: &Orchestrator,
    id: uuid::Uuid,
    timeout: Duration,
    pred: impl Fn(&Job) -> bool,
) -> Job {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = orc.get_job(id).await.unwrap();
        if pred(&job) {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting, job is {} at stage {:?}",
            job.status,
            job.stage()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn pool_with(orc: &Arc<Orchestrator>, executor: Arc<dyn StageExecutor>) -> Arc<WorkerPool> {
    Arc::new(
        WorkerPool::new(orc.clone(), executor)
            .with_lease_duration(LEASE)
            .with_poll_interval(FAST_POLL),
    )
}

// ---------------------------------------------------------------------------
// End-to-end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn workers_drive_a_job_to_completion() {
    let orc = Arc::new(Orchestrator::in_memory());
    let pool = pool_with(&orc, Arc::new(SimulatedExecutor::instant()));
    pool.scale_to(ResourceClass::Cpu, 1).await;
    pool.scale_to(ResourceClass::Gpu, 1).await;

    let job = submit(&orc).await;
    let done = wait_until(&orc, job.id, Duration::from_secs(10), |j| {
        j.status == JobStatus::Completed
    })
    .await;
    assert!(done.is_terminal());
    for stage in Stage::ALL {
        assert_eq!(done.attempts_for(stage), 1);
    }
    assert_eq!(
        orc.checkpoints_for_job(job.id).await.unwrap().len(),
        Stage::COUNT
    );

    pool.shutdown().await;
}

#[tokio::test]
async fn long_executions_outlive_the_lease_via_heartbeats() {
    let orc = Arc::new(Orchestrator::in_memory());
    // Lease far shorter than a stage execution; heartbeats keep it alive
    // while a fast reaper hunts for expired leases.
    let pool = Arc::new(
        WorkerPool::new(orc.clone(), Arc::new(SimulatedExecutor::new(Duration::from_millis(250))))
            .with_lease_duration(Duration::from_millis(100))
            .with_poll_interval(FAST_POLL),
    );
    pool.scale_to(ResourceClass::Cpu, 1).await;
    pool.scale_to(ResourceClass::Gpu, 1).await;
    let reaper_cancel = CancellationToken::new();
    tokio::spawn(
        parallax_queue::LeaseReaper::new(orc.queue().clone())
            .with_interval(Duration::from_millis(25))
            .run(reaper_cancel.clone()),
    );

    let job = submit(&orc).await;
    let done = wait_until(&orc, job.id, Duration::from_secs(30), |j| {
        j.status == JobStatus::Completed
    })
    .await;
    // No stage was redelivered: every attempt counter stayed at one.
    for stage in Stage::ALL {
        assert_eq!(done.attempts_for(stage), 1);
    }

    reaper_cancel.cancel();
    pool.shutdown().await;
}

#[tokio::test]
async fn a_reaped_lease_does_not_drop_the_outcome_report() {
    let orc = Arc::new(Orchestrator::in_memory());
    let pool = pool_with(
        &orc,
        Arc::new(SimulatedExecutor::new(Duration::from_millis(400))),
    );
    pool.scale_to(ResourceClass::Cpu, 1).await;

    let job = submit(&orc).await;
    wait_until(&orc, job.id, Duration::from_secs(5), |j| {
        j.status == JobStatus::Running
    })
    .await;

    // Expire the lease out from under the worker mid-execution, then
    // withdraw the requeued copy so only the straggler's report can move
    // the job forward.
    let key = TaskKey::new(job.id, Stage::Validate);
    let reaped = orc
        .queue()
        .reap_expired(chrono::Utc::now() + chrono::Duration::minutes(10))
        .await;
    assert_eq!(reaped, vec![key]);
    assert!(orc.queue().remove(key).await.unwrap());

    // The worker finds its lease gone at release time but still reports
    // the success, and the job advances on the original attempt.
    let advanced = wait_until(&orc, job.id, Duration::from_secs(5), |j| {
        j.stage() != Some(Stage::Validate)
    })
    .await;
    assert_eq!(advanced.stage(), Some(Stage::Sample));
    assert_eq!(advanced.attempts_for(Stage::Validate), 1);

    pool.shutdown().await;
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_reaches_the_executor_through_the_token() {
    let orc = Arc::new(Orchestrator::in_memory());
    // Executor would run for a minute; it must abort long before that.
    let pool = pool_with(&orc, Arc::new(SimulatedExecutor::new(Duration::from_secs(60))));
    pool.scale_to(ResourceClass::Cpu, 1).await;

    let job = submit(&orc).await;
    wait_until(&orc, job.id, Duration::from_secs(5), |j| {
        j.status == JobStatus::Running
    })
    .await;

    let cancelling = orc.cancel(job.id).await.unwrap();
    assert!(cancelling.cancel_requested);

    let done = wait_until(&orc, job.id, Duration::from_secs(5), |j| {
        j.status == JobStatus::Cancelled
    })
    .await;
    assert!(done.is_terminal());

    pool.shutdown().await;
}

// ---------------------------------------------------------------------------
// Preemption
// ---------------------------------------------------------------------------

/// Completes every stage instantly except the first reconstruction pass,
/// which blocks until preempted and hands back partial training state.
/// The retried pass sees the state and finishes.
struct PreemptableReconstruction;

#[async_trait]
impl StageExecutor for PreemptableReconstruction {
    async fn execute(&self, ctx: ExecutionContext) -> TaskOutcome {
        if ctx.stage == Stage::Reconstruct && ctx.resume_state.is_none() {
            tokio::select! {
                _ = ctx.preempt.cancelled() => {
                    return TaskOutcome::Preempted {
                        checkpoint_state: Some(serde_json::json!({"iteration": 12_000})),
                    };
                }
                _ = ctx.cancel.cancelled() => return TaskOutcome::Aborted,
            }
        }
        if ctx.stage == Stage::Reconstruct {
            assert_eq!(ctx.resume_state.as_ref().unwrap()["iteration"], 12_000);
        }
        TaskOutcome::Succeeded {
            outputs: vec![ArtifactRef::new(format!("sim://{}/{}", ctx.job_id, ctx.stage))],
            checkpoint_state: None,
        }
    }
}

#[tokio::test]
async fn preempted_training_resumes_from_the_partial_checkpoint() {
    let orc = Arc::new(Orchestrator::in_memory());
    let pool = pool_with(&orc, Arc::new(PreemptableReconstruction));
    pool.scale_to(ResourceClass::Cpu, 1).await;
    pool.scale_to(ResourceClass::Gpu, 1).await;

    let job = submit(&orc).await;
    wait_until(&orc, job.id, Duration::from_secs(10), |j| {
        j.status == JobStatus::Running && j.stage() == Some(Stage::Reconstruct)
    })
    .await;

    // The instance hosting the GPU worker goes away.
    for id in pool.worker_ids(ResourceClass::Gpu).await {
        assert!(pool.preempt(&id).await);
    }
    // Replacement capacity picks the task back up.
    pool.scale_to(ResourceClass::Gpu, 1).await;

    let done = wait_until(&orc, job.id, Duration::from_secs(10), |j| {
        j.status == JobStatus::Completed
    })
    .await;
    // Preemption consumed no retry budget.
    assert_eq!(done.attempts_for(Stage::Reconstruct), 1);

    let reconstruct: Vec<_> = orc
        .checkpoints_for_job(job.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.stage == Stage::Reconstruct)
        .collect();
    assert_eq!(reconstruct.len(), 2);
    assert!(!reconstruct[0].complete);
    assert!(reconstruct[1].complete);

    pool.shutdown().await;
}

// ---------------------------------------------------------------------------
// GPU capacity split
// ---------------------------------------------------------------------------

#[tokio::test]
async fn gpu_pool_holds_the_preemptible_fraction() {
    let orc = Arc::new(Orchestrator::in_memory());
    let pool = pool_with(&orc, Arc::new(SimulatedExecutor::instant()));

    pool.scale_to(ResourceClass::Gpu, 10).await;
    assert_eq!(pool.size(ResourceClass::Gpu).await, 10);
    assert_eq!(pool.preemptible_count(ResourceClass::Gpu).await, 7);

    // CPU slots are always guaranteed.
    pool.scale_to(ResourceClass::Cpu, 4).await;
    assert_eq!(pool.preemptible_count(ResourceClass::Cpu).await, 0);

    pool.shutdown().await;
}

// ---------------------------------------------------------------------------
// Autoscaling
// ---------------------------------------------------------------------------

fn instant_policy() -> ScalePolicy {
    ScalePolicy {
        upper_threshold: 10,
        lower_threshold: 2,
        // Zero windows so each sample can decide; the production defaults
        // require minutes of sustained breach.
        up_window: Duration::ZERO,
        down_window: Duration::ZERO,
        increment: 2,
        decrement: 1,
        min_size: 1,
        max_size: 8,
    }
}

#[tokio::test]
async fn backlog_scales_the_gpu_pool_up() {
    let orc = Arc::new(Orchestrator::in_memory());
    // Slow executor so leased tasks stay out of the depth count briefly.
    let pool = pool_with(&orc, Arc::new(SimulatedExecutor::new(Duration::from_secs(60))));
    let cancel = CancellationToken::new();
    tokio::spawn(
        Autoscaler::new(pool.clone(), orc.queue().clone())
            .with_interval(Duration::from_millis(20))
            .with_policy(ResourceClass::Gpu, instant_policy())
            .run(cancel.clone()),
    );

    for _ in 0..12 {
        orc.queue()
            .enqueue(Task::new(
                TaskKey::new(uuid::Uuid::new_v4(), Stage::Reconstruct),
                1,
                vec![],
                ResourceClass::Gpu,
                PRIORITY_STANDARD,
            ))
            .await
            .unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while pool.size(ResourceClass::Gpu).await < 2 {
        assert!(tokio::time::Instant::now() < deadline, "pool never scaled up");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    cancel.cancel();
    pool.shutdown().await;
}

#[tokio::test]
async fn idle_pool_scales_down_to_the_floor() {
    let orc = Arc::new(Orchestrator::in_memory());
    let pool = pool_with(&orc, Arc::new(SimulatedExecutor::instant()));
    pool.scale_to(ResourceClass::Cpu, 3).await;

    let cancel = CancellationToken::new();
    tokio::spawn(
        Autoscaler::new(pool.clone(), orc.queue().clone())
            .with_interval(Duration::from_millis(20))
            .with_policy(ResourceClass::Cpu, instant_policy())
            .run(cancel.clone()),
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while pool.size(ResourceClass::Cpu).await > 1 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "pool never scaled down"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pool.size(ResourceClass::Cpu).await, 1);

    cancel.cancel();
    pool.shutdown().await;
}
