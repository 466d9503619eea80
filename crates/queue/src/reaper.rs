//! Periodic reclamation of abandoned leases.
//!
//! Workers renew their lease while a stage executes; a worker that crashes
//! or is partitioned stops renewing, and its lease expires. This loop scans
//! for expired leases on a fixed interval and returns the underlying tasks
//! to their queues for redispatch. Runs until the cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::queue::TaskQueue;

/// How often the reaper scans for expired leases.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(10);

/// Background lease reaper.
pub struct LeaseReaper {
    queue: Arc<TaskQueue>,
    interval: Duration,
}

impl LeaseReaper {
    pub fn new(queue: Arc<TaskQueue>) -> Self {
        Self {
            queue,
            interval: DEFAULT_REAP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the reap loop until `cancel` is triggered.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Lease reaper started"
        );
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Lease reaper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let requeued = self.queue.reap_expired(chrono::Utc::now()).await;
                    if !requeued.is_empty() {
                        tracing::warn!(
                            count = requeued.len(),
                            "Requeued tasks from expired leases"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_core::stage::{ResourceClass, Stage};
    use parallax_core::task::{Task, TaskKey, PRIORITY_STANDARD};

    #[tokio::test]
    async fn reaper_requeues_expired_leases_and_stops_on_cancel() {
        let queue = Arc::new(TaskQueue::new());
        let key = TaskKey::new(uuid::Uuid::new_v4(), Stage::Sample);
        queue
            .enqueue(Task::new(
                key,
                1,
                vec![],
                ResourceClass::Cpu,
                PRIORITY_STANDARD,
            ))
            .await
            .unwrap();
        queue
            .lease("w1", ResourceClass::Cpu, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            LeaseReaper::new(queue.clone())
                .with_interval(Duration::from_millis(20))
                .run(cancel.clone()),
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!queue.is_leased(key).await);
        assert!(queue.is_in_flight(key).await);

        cancel.cancel();
        handle.await.unwrap();
    }
}
