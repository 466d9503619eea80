//! Task queue and lease manager.
//!
//! One ordered queue per resource class with strict priority tiers (FIFO
//! within a tier), time-bounded leases that make redelivery safe, and a
//! background reaper that returns abandoned leases to the queue.

pub mod queue;
pub mod reaper;

pub use queue::{LeasedTask, TaskQueue};
pub use reaper::LeaseReaper;
