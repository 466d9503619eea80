//! Worker pool: stage execution, leasing, heartbeats, autoscaling.
//!
//! A [`Worker`] repeatedly leases tasks for its resource class, runs the
//! [`StageExecutor`], and reports the outcome to the orchestrator. The
//! [`WorkerPool`] spawns and stops workers per class, keeping the GPU
//! pool's preemptible/guaranteed split near its target, and the
//! [`Autoscaler`] resizes pools from sustained queue-depth breaches.

pub mod autoscaler;
pub mod config;
pub mod executor;
pub mod pool;
pub mod worker;

pub use autoscaler::Autoscaler;
pub use config::WorkerConfig;
pub use executor::{ExecutionContext, SimulatedExecutor, StageExecutor};
pub use pool::WorkerPool;
pub use worker::Worker;
