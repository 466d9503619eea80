//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`JobEvent`]s. The
//! orchestrator publishes; the notification dispatcher (and any diagnostic
//! subscriber) receives. Shared via `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use parallax_core::job::JobStatus;
use parallax_core::stage::Stage;
use parallax_core::types::JobId;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// A job lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Dot-separated event name, e.g. `"job.completed"`.
    pub event_type: String,

    pub job_id: JobId,

    /// Job status at the time the event was published.
    pub status: JobStatus,

    /// The stage the event refers to, when stage-scoped.
    pub stage: Option<Stage>,

    /// Operator-facing failure summary, set on `job.failed`.
    pub error_summary: Option<String>,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    /// Event for a job reaching a terminal status.
    pub fn terminal(job_id: JobId, status: JobStatus) -> Self {
        let name = match status {
            JobStatus::Completed => "job.completed",
            JobStatus::Failed => "job.failed",
            JobStatus::Cancelled => "job.cancelled",
            other => {
                debug_assert!(false, "terminal event for non-terminal status {other}");
                "job.updated"
            }
        };
        Self {
            event_type: name.to_string(),
            job_id,
            status,
            stage: None,
            error_summary: None,
            timestamp: Utc::now(),
        }
    }

    /// Progress event published when a stage finishes.
    pub fn stage_completed(job_id: JobId, status: JobStatus, stage: Stage) -> Self {
        Self {
            event_type: "job.stage_completed".to_string(),
            job_id,
            status,
            stage: Some(stage),
            error_summary: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_error_summary(mut self, summary: impl Into<String>) -> Self {
        self.error_summary = Some(summary.into());
        self
    }

    /// Terminal events are the ones the notification dispatcher delivers.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`JobEvent`].
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped;
    /// delivery is best-effort and never feeds back into job state.
    pub fn publish(&self, event: JobEvent) {
        // Ignore the SendError; it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
