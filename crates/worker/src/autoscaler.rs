//! Queue-depth driven pool resizing.
//!
//! Samples the queue depth for each resource class on a fixed interval and
//! feeds the observations into the core scaling policy; sustained breaches
//! resize the pool by the policy's step.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use parallax_core::autoscale::{ScaleDecision, ScaleEvaluator, ScalePolicy};
use parallax_core::stage::ResourceClass;
use parallax_queue::TaskQueue;

use crate::pool::WorkerPool;

/// How often queue depth is sampled.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(30);

pub struct Autoscaler {
    pool: Arc<WorkerPool>,
    queue: Arc<TaskQueue>,
    interval: Duration,
    evaluators: HashMap<ResourceClass, ScaleEvaluator>,
}

impl Autoscaler {
    pub fn new(pool: Arc<WorkerPool>, queue: Arc<TaskQueue>) -> Self {
        let evaluators = ResourceClass::ALL
            .into_iter()
            .map(|class| (class, ScaleEvaluator::new(ScalePolicy::default())))
            .collect();
        Self {
            pool,
            queue,
            interval: DEFAULT_SAMPLE_INTERVAL,
            evaluators,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_policy(mut self, class: ResourceClass, policy: ScalePolicy) -> Self {
        self.evaluators.insert(class, ScaleEvaluator::new(policy));
        self
    }

    /// Run the sampling loop until `cancel` is triggered.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Autoscaler started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Autoscaler stopping");
                    break;
                }
                _ = ticker.tick() => self.sample().await,
            }
        }
    }

    async fn sample(&mut self) {
        let now = chrono::Utc::now();
        for class in ResourceClass::ALL {
            let Some(evaluator) = self.evaluators.get_mut(&class) else {
                continue;
            };
            let depth = self.queue.depth(class).await;
            let size = self.pool.size(class).await;
            match evaluator.observe(depth, size, now) {
                Some(ScaleDecision::Up(step)) => {
                    tracing::info!(class = %class, depth, size, step, "Scaling up");
                    self.pool.scale_to(class, size + step).await;
                }
                Some(ScaleDecision::Down(step)) => {
                    tracing::info!(class = %class, depth, size, step, "Scaling down");
                    self.pool.scale_to(class, size.saturating_sub(step)).await;
                }
                None => {}
            }
        }
    }
}
