//! The orchestration engine.
//!
//! [`Orchestrator`] owns every job state transition: it enqueues stage
//! tasks, applies the retry policy to reported outcomes, writes checkpoints,
//! and publishes lifecycle events. Workers never mutate job state directly;
//! they lease tasks and report outcomes back here.
//!
//! The [`memory`] module provides in-memory store implementations with the
//! same versioning semantics as the Postgres ones, used by tests and
//! single-process deployments.

pub mod memory;
pub mod orchestrator;

pub use memory::{MemoryCheckpointStore, MemoryDeadLetterStore, MemoryJobStore};
pub use orchestrator::{Advancement, FailureDisposition, Orchestrator};
