//! The stage execution contract.
//!
//! Stage algorithms (frame sampling, pose estimation, splat training,
//! packaging) live behind [`StageExecutor`]; the orchestration layer only
//! sees opaque artifact references going in and coming out. Executors must
//! observe the cancellation and preemption tokens cooperatively, within
//! [`MAX_CANCEL_POLL`] at the latest.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use parallax_core::stage::Stage;
use parallax_core::task::TaskOutcome;
use parallax_core::types::{ArtifactRef, JobId};

/// Upper bound on how long an executor may go without checking its tokens.
pub const MAX_CANCEL_POLL: Duration = Duration::from_secs(30);

/// Everything an executor gets for one attempt of one stage.
pub struct ExecutionContext {
    pub job_id: JobId,
    pub stage: Stage,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Artifacts produced by the previous stage (or the job input).
    pub inputs: Vec<ArtifactRef>,
    /// Checkpointed state to resume from, for resumable stages.
    pub resume_state: Option<serde_json::Value>,
    /// Request a reduced resource footprint (set after an OOM failure).
    pub degraded: bool,
    /// Job cancellation; return [`TaskOutcome::Aborted`] when it fires.
    pub cancel: CancellationToken,
    /// Instance preemption warning; persist what you can and return
    /// [`TaskOutcome::Preempted`] when it fires.
    pub preempt: CancellationToken,
}

#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, ctx: ExecutionContext) -> TaskOutcome;
}

// ---------------------------------------------------------------------------
// SimulatedExecutor
// ---------------------------------------------------------------------------

/// Development executor: pretends to do the work for a configurable
/// duration while honoring both tokens, then emits a synthetic output
/// artifact per stage. Used by the worker binary when no real stage
/// implementations are wired in, and by integration tests.
pub struct SimulatedExecutor {
    step: Duration,
}

impl SimulatedExecutor {
    pub fn new(step: Duration) -> Self {
        Self { step }
    }

    /// Completes stages as fast as the runtime allows.
    pub fn instant() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[async_trait]
impl StageExecutor for SimulatedExecutor {
    async fn execute(&self, ctx: ExecutionContext) -> TaskOutcome {
        tokio::select! {
            _ = ctx.cancel.cancelled() => return TaskOutcome::Aborted,
            _ = ctx.preempt.cancelled() => {
                return TaskOutcome::Preempted {
                    checkpoint_state: ctx.resume_state,
                };
            }
            _ = tokio::time::sleep(self.step) => {}
        }
        TaskOutcome::Succeeded {
            outputs: vec![ArtifactRef::new(format!(
                "sim://{}/{}",
                ctx.job_id, ctx.stage
            ))],
            checkpoint_state: None,
        }
    }
}
