//! Background dispatcher that turns bus events into webhook notifications.
//!
//! Subscribes to the [`EventBus`] and delivers every terminal job event to
//! the configured webhook URL. Non-terminal events (stage progress) are
//! passed over; delivery failures are logged and dropped.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::webhook::WebhookNotifier;

/// Terminal-event notification loop.
pub struct NotificationDispatcher {
    bus: Arc<EventBus>,
    notifier: WebhookNotifier,
    webhook_url: String,
}

impl NotificationDispatcher {
    pub fn new(bus: Arc<EventBus>, webhook_url: impl Into<String>) -> Self {
        Self {
            bus,
            notifier: WebhookNotifier::new(),
            webhook_url: webhook_url.into(),
        }
    }

    /// Run the dispatch loop until `cancel` is triggered.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(url = %self.webhook_url, "Notification dispatcher started");
        let mut rx = self.bus.subscribe();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Notification dispatcher stopping");
                    break;
                }
                received = rx.recv() => match received {
                    Ok(event) if event.is_terminal() => {
                        if let Err(e) = self.notifier.deliver(&self.webhook_url, &event).await {
                            tracing::error!(
                                job_id = %event.job_id,
                                event_type = %event.event_type,
                                error = %e,
                                "Dropping undeliverable notification"
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Notification dispatcher lagged behind the bus");
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("Event bus closed, notification dispatcher stopping");
                        break;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::JobEvent;
    use parallax_core::job::JobStatus;

    #[tokio::test]
    async fn dispatcher_stops_on_cancel() {
        let bus = Arc::new(EventBus::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            NotificationDispatcher::new(bus.clone(), "http://127.0.0.1:1/hook")
                .run(cancel.clone()),
        );

        // Non-terminal events are skipped without touching the network.
        bus.publish(JobEvent::stage_completed(
            uuid::Uuid::new_v4(),
            JobStatus::Running,
            parallax_core::stage::Stage::Sample,
        ));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
