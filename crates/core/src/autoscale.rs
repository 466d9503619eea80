//! Worker-pool scaling policy.
//!
//! Pure evaluation logic: the worker crate samples queue depth on an
//! interval and feeds observations in here; this module decides when a
//! sustained breach warrants a resize. Hysteresis between the upper and
//! lower thresholds prevents oscillation, and the breach timer resets
//! after every decision so one sustained breach yields exactly one resize.

use std::time::Duration;

use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Queue depth above which a sustained breach triggers scale-up.
pub const DEFAULT_UPPER_THRESHOLD: usize = 10;

/// Queue depth below which a sustained breach triggers scale-down.
pub const DEFAULT_LOWER_THRESHOLD: usize = 2;

/// How long the depth must stay above the upper threshold.
pub const DEFAULT_UP_WINDOW: Duration = Duration::from_secs(5 * 60);

/// How long the depth must stay below the lower threshold.
pub const DEFAULT_DOWN_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Fraction of GPU pool capacity served from preemptible instances.
pub const DEFAULT_PREEMPTIBLE_FRACTION: f64 = 0.7;

// ---------------------------------------------------------------------------
// ScalePolicy
// ---------------------------------------------------------------------------

/// Thresholds, windows, and step sizes for one worker pool.
#[derive(Debug, Clone)]
pub struct ScalePolicy {
    pub upper_threshold: usize,
    pub lower_threshold: usize,
    pub up_window: Duration,
    pub down_window: Duration,
    /// Workers added per scale-up decision.
    pub increment: usize,
    /// Workers removed per scale-down decision.
    pub decrement: usize,
    pub min_size: usize,
    pub max_size: usize,
}

impl Default for ScalePolicy {
    fn default() -> Self {
        Self {
            upper_threshold: DEFAULT_UPPER_THRESHOLD,
            lower_threshold: DEFAULT_LOWER_THRESHOLD,
            up_window: DEFAULT_UP_WINDOW,
            down_window: DEFAULT_DOWN_WINDOW,
            increment: 2,
            decrement: 1,
            min_size: 1,
            max_size: 16,
        }
    }
}

/// A resize decision: how many workers to add or remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    Up(usize),
    Down(usize),
}

// ---------------------------------------------------------------------------
// ScaleEvaluator
// ---------------------------------------------------------------------------

/// Tracks breach windows across observations for one pool.
#[derive(Debug)]
pub struct ScaleEvaluator {
    policy: ScalePolicy,
    above_since: Option<Timestamp>,
    below_since: Option<Timestamp>,
}

impl ScaleEvaluator {
    pub fn new(policy: ScalePolicy) -> Self {
        Self {
            policy,
            above_since: None,
            below_since: None,
        }
    }

    pub fn policy(&self) -> &ScalePolicy {
        &self.policy
    }

    /// Feed one depth sample. Returns a decision when a breach has been
    /// sustained for the full window; the breach timer then restarts so a
    /// continuing breach must persist for another full window before the
    /// next step.
    pub fn observe(
        &mut self,
        depth: usize,
        pool_size: usize,
        now: Timestamp,
    ) -> Option<ScaleDecision> {
        if depth > self.policy.upper_threshold {
            self.below_since = None;
            let since = *self.above_since.get_or_insert(now);
            if elapsed(since, now) >= self.policy.up_window {
                self.above_since = None;
                let headroom = self.policy.max_size.saturating_sub(pool_size);
                let step = self.policy.increment.min(headroom);
                if step > 0 {
                    return Some(ScaleDecision::Up(step));
                }
            }
        } else if depth < self.policy.lower_threshold {
            self.above_since = None;
            let since = *self.below_since.get_or_insert(now);
            if elapsed(since, now) >= self.policy.down_window {
                self.below_since = None;
                let slack = pool_size.saturating_sub(self.policy.min_size);
                let step = self.policy.decrement.min(slack);
                if step > 0 {
                    return Some(ScaleDecision::Down(step));
                }
            }
        } else {
            // Inside the hysteresis band: both breach timers reset.
            self.above_since = None;
            self.below_since = None;
        }
        None
    }
}

fn elapsed(since: Timestamp, now: Timestamp) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

// ---------------------------------------------------------------------------
// GPU capacity split
// ---------------------------------------------------------------------------

/// Number of pool slots that should be preemptible for a pool of
/// `total` workers, given a target fraction. The remainder is guaranteed
/// capacity; the pool falls back to guaranteed slots when preemptible
/// capacity is unavailable.
pub fn preemptible_target(total: usize, fraction: f64) -> usize {
    let clamped = fraction.clamp(0.0, 1.0);
    ((total as f64) * clamped).round() as usize
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
