//! Job records and the job lifecycle state machine.
//!
//! The state machine is an explicit transition table rather than scattered
//! conditionals so the lifecycle invariants can be asserted directly in
//! tests. Only the orchestrator may apply transitions to a persisted job.

use serde::{Deserialize, Serialize};

use crate::retry::ErrorClass;
use crate::stage::Stage;
use crate::types::{ArtifactRef, JobId, ProjectId, Timestamp};

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Authoritative job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a persisted status name. Returns `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(JobStatus::Pending),
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "paused" => Some(JobStatus::Paused),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Completed and Cancelled are final. Failed is final except for the
    /// operator resume path (see the transition table).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

pub mod state_machine {
    use super::JobStatus;
    use crate::error::CoreError;

    /// Returns the set of valid target statuses reachable from `from`.
    ///
    /// Notes on the table:
    /// - `Failed -> Queued` is the operator resume/replay edge; it is the
    ///   only way out of a terminal state.
    /// - `Running -> Queued` covers a retryable stage failure that has been
    ///   re-enqueued with backoff.
    /// - `Queued -> Failed` covers a task rejected before execution starts
    ///   (for example an executor that refuses malformed input on lease).
    pub fn valid_transitions(from: JobStatus) -> &'static [JobStatus] {
        use JobStatus::*;
        match from {
            Pending => &[Queued, Cancelled],
            Queued => &[Running, Paused, Failed, Cancelled],
            Running => &[Queued, Paused, Completed, Failed, Cancelled],
            Paused => &[Queued, Cancelled],
            Failed => &[Queued],
            Completed | Cancelled => &[],
        }
    }

    /// Check whether a transition from `from` to `to` is valid.
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a transition, producing `InvalidTransition` for bad edges.
    pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), CoreError> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition { from, to })
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One end-to-end pipeline run for a single uploaded input.
///
/// Mutated only by the orchestrator, persisted through a [`crate::store::JobStore`]
/// with optimistic versioning: every write carries the version the writer
/// read, and the store rejects the write if the stored version has advanced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub project_id: ProjectId,
    /// The uploaded scan or walkthrough video this job processes.
    pub input: ArtifactRef,
    pub status: JobStatus,
    /// Index into [`Stage::ALL`] of the stage currently owed work.
    pub current_stage: usize,
    /// Per-stage attempt counters, indexed like [`Stage::ALL`].
    pub attempts: [u32; Stage::COUNT],
    /// Priority tier inherited from the owning project.
    pub priority: i32,
    /// Set by `Cancel`; observed cooperatively by the running executor.
    pub cancel_requested: bool,
    /// Coarse class of the most recent failure, if any.
    pub last_error_class: Option<ErrorClass>,
    /// Operator-visible summary of the most recent failure, if any.
    pub last_error: Option<String>,
    /// Optimistic concurrency counter; bumped on every persisted update.
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    pub fn new(project_id: ProjectId, input: ArtifactRef, priority: i32) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4(),
            project_id,
            input,
            status: JobStatus::Pending,
            current_stage: 0,
            attempts: [0; Stage::COUNT],
            priority,
            cancel_requested: false,
            last_error_class: None,
            last_error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The stage currently owed work, or `None` once the job has walked
    /// past the last stage.
    pub fn stage(&self) -> Option<Stage> {
        Stage::at(self.current_stage)
    }

    pub fn attempts_for(&self, stage: Stage) -> u32 {
        self.attempts[stage.index()]
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::state_machine::*;
    use super::*;

    fn job() -> Job {
        Job::new(uuid::Uuid::new_v4(), ArtifactRef::from("scan://input"), 0)
    }

    // -----------------------------------------------------------------------
    // Valid transitions
    // -----------------------------------------------------------------------

    #[test]
    fn pending_to_queued() {
        assert!(can_transition(JobStatus::Pending, JobStatus::Queued));
    }

    #[test]
    fn queued_to_running() {
        assert!(can_transition(JobStatus::Queued, JobStatus::Running));
    }

    #[test]
    fn running_to_completed() {
        assert!(can_transition(JobStatus::Running, JobStatus::Completed));
    }

    #[test]
    fn running_to_queued_for_retry() {
        assert!(can_transition(JobStatus::Running, JobStatus::Queued));
    }

    #[test]
    fn running_to_failed() {
        assert!(can_transition(JobStatus::Running, JobStatus::Failed));
    }

    #[test]
    fn failed_to_queued_is_the_resume_edge() {
        assert!(can_transition(JobStatus::Failed, JobStatus::Queued));
    }

    #[test]
    fn paused_to_queued() {
        assert!(can_transition(JobStatus::Paused, JobStatus::Queued));
    }

    #[test]
    fn every_non_terminal_state_can_cancel() {
        for from in [
            JobStatus::Pending,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Paused,
        ] {
            assert!(can_transition(from, JobStatus::Cancelled), "{from}");
        }
    }

    // -----------------------------------------------------------------------
    // Invalid transitions
    // -----------------------------------------------------------------------

    #[test]
    fn completed_has_no_transitions() {
        assert!(valid_transitions(JobStatus::Completed).is_empty());
    }

    #[test]
    fn cancelled_has_no_transitions() {
        assert!(valid_transitions(JobStatus::Cancelled).is_empty());
    }

    #[test]
    fn failed_cannot_complete_directly() {
        assert!(!can_transition(JobStatus::Failed, JobStatus::Completed));
    }

    #[test]
    fn failed_cannot_cancel() {
        // Failed is terminal; cancellation only applies to live jobs.
        assert!(!can_transition(JobStatus::Failed, JobStatus::Cancelled));
    }

    #[test]
    fn pending_cannot_run_without_queueing() {
        assert!(!can_transition(JobStatus::Pending, JobStatus::Running));
    }

    #[test]
    fn validate_transition_reports_the_edge() {
        let err = validate_transition(JobStatus::Completed, JobStatus::Running).unwrap_err();
        assert_eq!(err.to_string(), "Invalid transition: completed -> running");
    }

    // -----------------------------------------------------------------------
    // Job record
    // -----------------------------------------------------------------------

    #[test]
    fn new_job_defaults() {
        let j = job();
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.current_stage, 0);
        assert_eq!(j.stage(), Some(Stage::Validate));
        assert_eq!(j.attempts, [0; Stage::COUNT]);
        assert_eq!(j.version, 0);
        assert!(!j.cancel_requested);
        assert!(j.last_error.is_none());
    }

    #[test]
    fn stage_is_none_past_the_last_stage() {
        let mut j = job();
        j.current_stage = Stage::COUNT;
        assert_eq!(j.stage(), None);
    }

    #[test]
    fn status_name_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Paused,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::from_name(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::from_name("archived"), None);
    }

    #[test]
    fn job_serialization_roundtrip() {
        let j = job();
        let json = serde_json::to_string(&j).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, j.id);
        assert_eq!(back.status, JobStatus::Pending);
        assert_eq!(back.attempts, j.attempts);
    }
}
