//! Retry policy: error classification, exponential backoff, dead letters.
//!
//! Backoff for attempt `n` (1-based) is `base * 2^(n-1)`, capped at
//! [`MAX_BACKOFF`]. Whether a failure is retried at all depends on the
//! error class: validation failures are permanent, preemptions are handled
//! out of band and never consume the attempt budget.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stage::StageDefinition;
use crate::task::TaskKey;
use crate::types::Timestamp;

/// Cap on any single retry backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// ErrorClass
// ---------------------------------------------------------------------------

/// Closed set of failure classes the retry policy dispatches on.
///
/// Free-text detail travels alongside the tag (in the task outcome and the
/// job's error fields); policy decisions look only at the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network blip, temporary resource contention. Retried.
    Transient,
    /// Out-of-memory or similar. Retried, with a degraded-resources hint.
    ResourceExhausted,
    /// Malformed or out-of-spec input. Never retried.
    Validation,
    /// Spot-instance preemption. Re-leased transparently, no attempt spent.
    Preempted,
    /// Unclassified executor failure. Retried.
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::ResourceExhausted => "resource_exhausted",
            ErrorClass::Validation => "validation",
            ErrorClass::Preempted => "preempted",
            ErrorClass::Internal => "internal",
        }
    }

    /// Parse from a persisted tag, defaulting to `Internal` for unknown values.
    pub fn from_str(s: &str) -> Self {
        match s {
            "transient" => ErrorClass::Transient,
            "resource_exhausted" => ErrorClass::ResourceExhausted,
            "validation" => ErrorClass::Validation,
            "preempted" => ErrorClass::Preempted,
            _ => ErrorClass::Internal,
        }
    }

    /// Whether failures of this class may consume another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorClass::Validation)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Backoff delay before re-dispatching attempt `attempt + 1`.
///
/// `attempt` is the 1-based attempt that just failed: the first retry waits
/// `base`, the second `2 * base`, doubling until [`MAX_BACKOFF`].
pub fn next_backoff(attempt: u32, base: Duration) -> Duration {
    // Exponent is clamped so the shift cannot overflow for absurd attempts.
    let exp = attempt.saturating_sub(1).min(31);
    let delay = base.saturating_mul(1u32 << exp);
    delay.min(MAX_BACKOFF)
}

/// Whether another attempt should be scheduled after a failure of `class`
/// on the given 1-based `attempt`.
pub fn should_retry(def: &StageDefinition, attempt: u32, class: ErrorClass) -> bool {
    class.is_retryable() && attempt < def.max_attempts
}

// ---------------------------------------------------------------------------
// Dead letters
// ---------------------------------------------------------------------------

/// One failed attempt, kept for the dead-letter attempt history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub class: ErrorClass,
    pub message: String,
    pub failed_at: Timestamp,
}

/// A task whose retry budget is exhausted (or whose failure was permanent).
///
/// Leaves this state only through operator action: replay (attempt counter
/// reset) or discard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub key: TaskKey,
    pub last_error: String,
    pub last_class: ErrorClass,
    pub attempt_history: Vec<AttemptRecord>,
    pub enqueued_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
