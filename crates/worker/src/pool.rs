//! Worker pool management.
//!
//! One pool per process, slots grouped by resource class. GPU capacity is
//! split between preemptible and guaranteed slots: new GPU slots are
//! preemptible while the pool is below its target preemptible fraction,
//! guaranteed otherwise. CPU slots are always guaranteed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use parallax_core::autoscale::{preemptible_target, DEFAULT_PREEMPTIBLE_FRACTION};
use parallax_core::stage::ResourceClass;
use parallax_core::types::WorkerId;
use parallax_pipeline::Orchestrator;

use crate::executor::StageExecutor;
use crate::worker::{Worker, DEFAULT_LEASE_DURATION, DEFAULT_POLL_INTERVAL};

struct WorkerSlot {
    id: WorkerId,
    preemptible: bool,
    stop: CancellationToken,
    preempt: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct WorkerPool {
    orchestrator: Arc<Orchestrator>,
    executor: Arc<dyn StageExecutor>,
    preemptible_fraction: f64,
    lease_duration: Duration,
    poll_interval: Duration,
    next_id: AtomicU64,
    slots: Mutex<HashMap<ResourceClass, Vec<WorkerSlot>>>,
}

impl WorkerPool {
    pub fn new(orchestrator: Arc<Orchestrator>, executor: Arc<dyn StageExecutor>) -> Self {
        Self {
            orchestrator,
            executor,
            preemptible_fraction: DEFAULT_PREEMPTIBLE_FRACTION,
            lease_duration: DEFAULT_LEASE_DURATION,
            poll_interval: DEFAULT_POLL_INTERVAL,
            next_id: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_preemptible_fraction(mut self, fraction: f64) -> Self {
        self.preemptible_fraction = fraction;
        self
    }

    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Grow or shrink the pool for `class` to `target` workers. Shrinking
    /// stops the newest slots first; their workers exit after finishing the
    /// task in hand.
    pub async fn scale_to(&self, class: ResourceClass, target: usize) {
        let mut slots = self.slots.lock().await;
        let pool = slots.entry(class).or_default();

        while pool.len() > target {
            if let Some(slot) = pool.pop() {
                tracing::info!(worker_id = %slot.id, "Stopping worker");
                slot.stop.cancel();
            }
        }
        while pool.len() < target {
            let preemptible = class == ResourceClass::Gpu
                && pool.iter().filter(|s| s.preemptible).count()
                    < preemptible_target(pool.len() + 1, self.preemptible_fraction);
            pool.push(self.spawn_worker(class, preemptible));
        }
        tracing::info!(class = %class, size = pool.len(), "Worker pool resized");
    }

    fn spawn_worker(&self, class: ResourceClass, preemptible: bool) -> WorkerSlot {
        let id = format!("{}-{}", class, self.next_id.fetch_add(1, Ordering::Relaxed));
        let stop = CancellationToken::new();
        let preempt = CancellationToken::new();
        let worker = Worker::new(
            id.clone(),
            class,
            self.orchestrator.clone(),
            self.executor.clone(),
            preempt.clone(),
        )
        .with_lease_duration(self.lease_duration)
        .with_poll_interval(self.poll_interval);
        let handle = tokio::spawn(worker.run(stop.clone()));
        tracing::info!(worker_id = %id, class = %class, preemptible, "Worker spawned");
        WorkerSlot {
            id,
            preemptible,
            stop,
            preempt,
            handle,
        }
    }

    pub async fn size(&self, class: ResourceClass) -> usize {
        self.slots
            .lock()
            .await
            .get(&class)
            .map_or(0, Vec::len)
    }

    pub async fn preemptible_count(&self, class: ResourceClass) -> usize {
        self.slots
            .lock()
            .await
            .get(&class)
            .map_or(0, |pool| pool.iter().filter(|s| s.preemptible).count())
    }

    /// Worker ids for a class, in spawn order.
    pub async fn worker_ids(&self, class: ResourceClass) -> Vec<WorkerId> {
        self.slots
            .lock()
            .await
            .get(&class)
            .map_or_else(Vec::new, |pool| {
                pool.iter().map(|s| s.id.clone()).collect()
            })
    }

    /// Simulate (or relay) an instance preemption warning. The worker
    /// persists partial progress through its executor, reports the task
    /// preempted, and exits. Returns `false` for an unknown worker id.
    pub async fn preempt(&self, worker_id: &str) -> bool {
        let mut slots = self.slots.lock().await;
        for pool in slots.values_mut() {
            if let Some(index) = pool.iter().position(|s| s.id == worker_id) {
                let slot = pool.remove(index);
                tracing::warn!(worker_id = %slot.id, "Preempting worker");
                slot.preempt.cancel();
                return true;
            }
        }
        false
    }

    /// Stop every worker and wait for their loops to exit.
    pub async fn shutdown(&self) {
        let mut slots = self.slots.lock().await;
        let drained: Vec<WorkerSlot> = slots.drain().flat_map(|(_, pool)| pool).collect();
        drop(slots);
        for slot in &drained {
            slot.stop.cancel();
        }
        for slot in drained {
            let _ = slot.handle.await;
        }
        tracing::info!("Worker pool shut down");
    }
}
