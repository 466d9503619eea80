//! Event bus and notification dispatch.
//!
//! - [`EventBus`] — in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`] — the canonical job event envelope.
//! - [`WebhookNotifier`] — HTTP delivery of an event to an external URL
//!   with a fixed retry schedule.
//! - [`NotificationDispatcher`] — background loop that subscribes to the
//!   bus and delivers terminal job events.

pub mod bus;
pub mod dispatcher;
pub mod webhook;

pub use bus::{EventBus, JobEvent};
pub use dispatcher::NotificationDispatcher;
pub use webhook::{WebhookError, WebhookNotifier};
