//! The fixed pipeline stage list and per-stage execution parameters.
//!
//! Every job walks the same ordered stage sequence. The stages themselves
//! (frame filtering, structure-from-motion, splat training, packaging) are
//! opaque executors behind the worker crate's `StageExecutor` trait; this
//! module only describes how each stage is scheduled: which worker class it
//! needs, how long a lease should outlive it, how many attempts it gets,
//! and whether it can resume from a mid-execution checkpoint.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One ordered step of the tour-generation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Input sanity checks: container format, duration, resolution.
    Validate,
    /// Frame sampling / quality filtering from the walkthrough capture.
    Sample,
    /// Camera pose estimation over the sampled frames.
    EstimatePoses,
    /// Scene reconstruction (splat/NeRF training). Long-running, resumable.
    Reconstruct,
    /// Optimization passes: compression, level-of-detail generation.
    Optimize,
    /// Assemble the publishable tour bundle.
    Package,
    /// Final publish notification to downstream consumers.
    Notify,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 7] = [
        Stage::Validate,
        Stage::Sample,
        Stage::EstimatePoses,
        Stage::Reconstruct,
        Stage::Optimize,
        Stage::Package,
        Stage::Notify,
    ];

    /// Total number of pipeline stages.
    pub const COUNT: usize = Self::ALL.len();

    /// Stable name used in logs, the API, and persisted rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Sample => "sample",
            Stage::EstimatePoses => "estimate_poses",
            Stage::Reconstruct => "reconstruct",
            Stage::Optimize => "optimize",
            Stage::Package => "package",
            Stage::Notify => "notify",
        }
    }

    /// Parse a persisted stage name. Returns `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == name)
    }

    /// Zero-based position of this stage in the pipeline.
    pub fn index(&self) -> usize {
        // ALL is small and fixed; a linear scan keeps one source of truth.
        Self::ALL.iter().position(|s| s == self).unwrap_or(0)
    }

    /// The stage after this one, or `None` for the last stage.
    pub fn next(&self) -> Option<Stage> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Look up a stage by pipeline index.
    pub fn at(index: usize) -> Option<Stage> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ResourceClass
// ---------------------------------------------------------------------------

/// The category of worker a stage requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Cpu,
    Gpu,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 2] = [ResourceClass::Cpu, ResourceClass::Gpu];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Cpu => "cpu",
            ResourceClass::Gpu => "gpu",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StageDefinition
// ---------------------------------------------------------------------------

/// Default retry budget per stage.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Static, per-stage scheduling parameters (not per-job).
#[derive(Debug, Clone)]
pub struct StageDefinition {
    pub stage: Stage,
    /// Which worker pool executes this stage.
    pub resource_class: ResourceClass,
    /// Upper bound on one execution; enforced indirectly by lease expiry.
    pub timeout: Duration,
    /// Maximum attempts before the task is dead-lettered.
    pub max_attempts: u32,
    /// Base delay for exponential retry backoff.
    pub base_backoff: Duration,
    /// Whether the stage executor can seed itself from a partial checkpoint.
    pub resumable: bool,
}

/// The scheduling parameters for a stage.
pub fn definition(stage: Stage) -> StageDefinition {
    let (resource_class, timeout_secs, base_backoff_secs, resumable) = match stage {
        Stage::Validate => (ResourceClass::Cpu, 5 * 60, 5, false),
        Stage::Sample => (ResourceClass::Cpu, 15 * 60, 5, false),
        Stage::EstimatePoses => (ResourceClass::Gpu, 30 * 60, 10, false),
        Stage::Reconstruct => (ResourceClass::Gpu, 2 * 60 * 60, 30, true),
        Stage::Optimize => (ResourceClass::Cpu, 60 * 60, 30, true),
        Stage::Package => (ResourceClass::Cpu, 30 * 60, 10, false),
        Stage::Notify => (ResourceClass::Cpu, 5 * 60, 5, false),
    };
    StageDefinition {
        stage,
        resource_class,
        timeout: Duration::from_secs(timeout_secs),
        max_attempts: DEFAULT_MAX_ATTEMPTS,
        base_backoff: Duration::from_secs(base_backoff_secs),
        resumable,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_is_fixed() {
        assert_eq!(Stage::ALL[0], Stage::Validate);
        assert_eq!(Stage::ALL[6], Stage::Notify);
        assert_eq!(Stage::COUNT, 7);
    }

    #[test]
    fn stage_index_and_at_are_inverse() {
        for (i, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(stage.index(), i);
            assert_eq!(Stage::at(i), Some(*stage));
        }
        assert_eq!(Stage::at(Stage::COUNT), None);
    }

    #[test]
    fn stage_next_walks_the_pipeline() {
        assert_eq!(Stage::Validate.next(), Some(Stage::Sample));
        assert_eq!(Stage::Package.next(), Some(Stage::Notify));
        assert_eq!(Stage::Notify.next(), None);
    }

    #[test]
    fn stage_name_roundtrip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_name(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::from_name("render"), None);
    }

    #[test]
    fn reconstruction_runs_on_gpu_and_is_resumable() {
        let def = definition(Stage::Reconstruct);
        assert_eq!(def.resource_class, ResourceClass::Gpu);
        assert!(def.resumable);
    }

    #[test]
    fn validate_is_cheap_cpu_work() {
        let def = definition(Stage::Validate);
        assert_eq!(def.resource_class, ResourceClass::Cpu);
        assert!(!def.resumable);
        assert_eq!(def.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn every_stage_has_a_positive_timeout_and_backoff() {
        for stage in Stage::ALL {
            let def = definition(stage);
            assert!(def.timeout > Duration::ZERO);
            assert!(def.base_backoff > Duration::ZERO);
            assert!(def.max_attempts >= 1);
        }
    }

    #[test]
    fn serde_names_are_snake_case() {
        let json = serde_json::to_string(&Stage::EstimatePoses).unwrap();
        assert_eq!(json, "\"estimate_poses\"");
        let class = serde_json::to_string(&ResourceClass::Gpu).unwrap();
        assert_eq!(class, "\"gpu\"");
    }
}
