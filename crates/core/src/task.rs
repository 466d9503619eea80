//! Dispatchable work units and their identity keys.

use serde::{Deserialize, Serialize};

use crate::retry::ErrorClass;
use crate::stage::{ResourceClass, Stage};
use crate::types::{ArtifactRef, JobId};

// ---------------------------------------------------------------------------
// Priority tiers
// ---------------------------------------------------------------------------

/// Priority for jobs owned by premium-tier projects. Dispatched first.
pub const PRIORITY_PREMIUM: i32 = 10;

/// Priority for standard-tier projects. Default.
pub const PRIORITY_STANDARD: i32 = 0;

/// Priority for free-tier projects. Dispatched last.
pub const PRIORITY_FREE: i32 = -10;

// ---------------------------------------------------------------------------
// TaskKey
// ---------------------------------------------------------------------------

/// Task identity. At most one task per key may be queued or leased at any
/// instant (single-flight per job per stage); the attempt number is
/// deliberately excluded so redelivery cannot mint a second in-flight task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub job_id: JobId,
    pub stage: Stage,
}

impl TaskKey {
    pub fn new(job_id: JobId, stage: Stage) -> Self {
        Self { job_id, stage }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.job_id, self.stage)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One attempt to execute one stage of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub key: TaskKey,
    /// 1-based attempt number, owned by the orchestrator's retry accounting.
    pub attempt: u32,
    /// Artifact references produced by the previous stage (or the job input).
    pub inputs: Vec<ArtifactRef>,
    /// Resumable state from the latest checkpoint, when the stage supports it.
    pub resume_state: Option<serde_json::Value>,
    pub resource_class: ResourceClass,
    pub priority: i32,
    /// Set after a resource-exhaustion failure: the executor should request
    /// a reduced resource footprint for this attempt.
    pub degraded: bool,
}

impl Task {
    pub fn new(
        key: TaskKey,
        attempt: u32,
        inputs: Vec<ArtifactRef>,
        resource_class: ResourceClass,
        priority: i32,
    ) -> Self {
        Self {
            key,
            attempt,
            inputs,
            resume_state: None,
            resource_class,
            priority,
            degraded: false,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskOutcome
// ---------------------------------------------------------------------------

/// What a worker reports back when it releases a lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// The stage executor finished and produced outputs for the next stage.
    Succeeded {
        outputs: Vec<ArtifactRef>,
        /// Optional resumable state to persist with the completion checkpoint.
        checkpoint_state: Option<serde_json::Value>,
    },
    /// The stage executor failed; the orchestrator consults the retry policy.
    Failed { class: ErrorClass, message: String },
    /// The executor observed the cancellation flag and stopped.
    Aborted,
    /// The worker received a preemption warning. Not counted as an attempt.
    Preempted {
        /// Partial progress persisted before the instance goes away, when
        /// the stage supports mid-execution checkpointing.
        checkpoint_state: Option<serde_json::Value>,
    },
}
