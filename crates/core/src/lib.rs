//! Parallax domain core: the pure orchestration model.
//!
//! This crate has zero internal dependencies so it can be used by the
//! queue, pipeline, worker, db, and API crates alike:
//!
//! - [`stage`] — the fixed pipeline stage list and per-stage execution
//!   parameters (resource class, timeout, retry budget).
//! - [`job`] — the job record and its explicit transition-table state
//!   machine.
//! - [`task`] — dispatchable work units and their identity keys.
//! - [`retry`] — error classification, exponential backoff, and the
//!   dead-letter entry shape.
//! - [`checkpoint`] — immutable stage progress records.
//! - [`autoscale`] — the hysteresis scaling policy for worker pools.
//! - [`store`] — async storage contracts implemented in-memory by the
//!   pipeline crate and on Postgres by the db crate.

pub mod autoscale;
pub mod checkpoint;
pub mod error;
pub mod job;
pub mod retry;
pub mod stage;
pub mod store;
pub mod task;
pub mod types;

pub use error::CoreError;
