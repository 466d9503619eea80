//! The in-process task queue with per-task leases.
//!
//! Dispatch order is strict priority, FIFO within a tier. Ties at the same
//! priority break on a monotonic enqueue sequence number assigned under the
//! queue lock, which is FIFO by enqueue time with a total order. A task
//! re-enqueued after a lease expires receives a fresh sequence number.
//!
//! Single-flight: the queue tracks every task identity that is currently
//! queued or leased and rejects a second enqueue for the same key. The
//! queue never touches attempt counters — retry accounting belongs to the
//! orchestrator; lease expiry only makes the task dispatchable again.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::Mutex;

use parallax_core::error::CoreError;
use parallax_core::stage::ResourceClass;
use parallax_core::task::{Task, TaskKey};
use parallax_core::types::{LeaseId, Timestamp, WorkerId};

/// A task handed to a worker together with its lease.
#[derive(Debug, Clone)]
pub struct LeasedTask {
    pub lease_id: LeaseId,
    pub task: Task,
    pub expires_at: Timestamp,
}

#[derive(Debug)]
struct QueuedEntry {
    task: Task,
    /// Monotonic enqueue sequence; the FIFO tie-break within a tier.
    seq: u64,
    /// Earliest dispatch time; used for retry backoff.
    not_before: Option<Timestamp>,
}

#[derive(Debug)]
struct ActiveLease {
    worker_id: WorkerId,
    task: Task,
    expires_at: Timestamp,
}

#[derive(Debug, Default)]
struct QueueState {
    next_seq: u64,
    queued: HashMap<ResourceClass, Vec<QueuedEntry>>,
    leases: HashMap<LeaseId, ActiveLease>,
    /// Every key currently queued or leased (single-flight guard).
    in_flight: HashSet<TaskKey>,
}

/// Per-resource-class task queues plus the lease table.
#[derive(Debug, Default)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task, dispatchable immediately.
    ///
    /// Returns `DuplicateTask` if a task with the same identity is already
    /// queued or leased.
    pub async fn enqueue(&self, task: Task) -> Result<(), CoreError> {
        self.enqueue_inner(task, None).await
    }

    /// Add a task that becomes dispatchable after `delay` (retry backoff).
    pub async fn enqueue_after(&self, task: Task, delay: Duration) -> Result<(), CoreError> {
        let not_before = chrono::Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        self.enqueue_inner(task, Some(not_before)).await
    }

    async fn enqueue_inner(
        &self,
        task: Task,
        not_before: Option<Timestamp>,
    ) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        if state.in_flight.contains(&task.key) {
            return Err(CoreError::DuplicateTask {
                job_id: task.key.job_id,
                stage: task.key.stage,
            });
        }
        state.in_flight.insert(task.key);
        let seq = state.next_seq;
        state.next_seq += 1;
        let class = task.resource_class;
        state
            .queued
            .entry(class)
            .or_default()
            .push(QueuedEntry {
                task,
                seq,
                not_before,
            });
        Ok(())
    }

    /// Pop the highest-priority ready task for `class` and lease it to
    /// `worker_id` for `duration`. Returns `None` when nothing is ready.
    pub async fn lease(
        &self,
        worker_id: &str,
        class: ResourceClass,
        duration: Duration,
    ) -> Result<Option<LeasedTask>, CoreError> {
        let now = chrono::Utc::now();
        let mut state = self.state.lock().await;

        let entries = match state.queued.get_mut(&class) {
            Some(entries) => entries,
            None => return Ok(None),
        };

        // Highest priority first; oldest enqueue sequence within a tier.
        let best = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.not_before.is_none_or(|t| t <= now))
            .max_by(|(_, a), (_, b)| {
                a.task
                    .priority
                    .cmp(&b.task.priority)
                    .then(b.seq.cmp(&a.seq))
            })
            .map(|(i, _)| i);

        let Some(index) = best else {
            return Ok(None);
        };

        let entry = entries.remove(index);
        let lease_id = uuid::Uuid::new_v4();
        let expires_at = now + chrono::Duration::from_std(duration).unwrap_or_default();
        let leased = LeasedTask {
            lease_id,
            task: entry.task.clone(),
            expires_at,
        };
        state.leases.insert(
            lease_id,
            ActiveLease {
                worker_id: worker_id.to_string(),
                task: entry.task,
                expires_at,
            },
        );
        Ok(Some(leased))
    }

    /// Extend an active lease by `extension` from now (heartbeat).
    pub async fn renew(
        &self,
        lease_id: LeaseId,
        extension: Duration,
    ) -> Result<Timestamp, CoreError> {
        let now = chrono::Utc::now();
        let mut state = self.state.lock().await;
        let lease = state
            .leases
            .get_mut(&lease_id)
            .ok_or(CoreError::LeaseNotFound(lease_id))?;
        if lease.expires_at <= now {
            return Err(CoreError::LeaseNotFound(lease_id));
        }
        lease.expires_at = now + chrono::Duration::from_std(extension).unwrap_or_default();
        Ok(lease.expires_at)
    }

    /// Finalize a lease, removing the task from flight.
    ///
    /// The caller releases the lease *before* reporting the outcome to the
    /// orchestrator, so a retry re-enqueue of the same identity is not
    /// rejected as a duplicate.
    pub async fn release(&self, lease_id: LeaseId) -> Result<Task, CoreError> {
        let mut state = self.state.lock().await;
        let lease = state
            .leases
            .remove(&lease_id)
            .ok_or(CoreError::LeaseNotFound(lease_id))?;
        state.in_flight.remove(&lease.task.key);
        Ok(lease.task)
    }

    /// Withdraw a queued (not leased) task, e.g. on cancel or pause.
    ///
    /// Returns `true` if a queued entry was removed; `false` if nothing was
    /// queued for the key (absent, or currently leased).
    pub async fn remove(&self, key: TaskKey) -> Result<bool, CoreError> {
        let mut state = self.state.lock().await;
        for entries in state.queued.values_mut() {
            if let Some(index) = entries.iter().position(|e| e.task.key == key) {
                entries.remove(index);
                state.in_flight.remove(&key);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether a non-expired lease exists for the key.
    pub async fn is_leased(&self, key: TaskKey) -> bool {
        let now = chrono::Utc::now();
        let state = self.state.lock().await;
        state
            .leases
            .values()
            .any(|l| l.task.key == key && l.expires_at > now)
    }

    /// Whether the key is queued or leased.
    pub async fn is_in_flight(&self, key: TaskKey) -> bool {
        self.state.lock().await.in_flight.contains(&key)
    }

    /// Number of queued (not leased) tasks for a class, ready or not.
    pub async fn depth(&self, class: ResourceClass) -> usize {
        let state = self.state.lock().await;
        state.queued.get(&class).map_or(0, Vec::len)
    }

    /// Return every task whose lease expired before `now` to its queue.
    ///
    /// Attempt counters are untouched: an abandoned lease is a crashed or
    /// partitioned worker, not a failed attempt. Returns the requeued keys.
    pub async fn reap_expired(&self, now: Timestamp) -> Vec<TaskKey> {
        let mut state = self.state.lock().await;
        let expired: Vec<LeaseId> = state
            .leases
            .iter()
            .filter(|(_, l)| l.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut requeued = Vec::with_capacity(expired.len());
        for lease_id in expired {
            let Some(lease) = state.leases.remove(&lease_id) else {
                continue;
            };
            tracing::warn!(
                task = %lease.task.key,
                worker_id = %lease.worker_id,
                "Lease expired; returning task to queue",
            );
            requeued.push(lease.task.key);
            let seq = state.next_seq;
            state.next_seq += 1;
            let class = lease.task.resource_class;
            state.queued.entry(class).or_default().push(QueuedEntry {
                task: lease.task,
                seq,
                not_before: None,
            });
        }
        requeued
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
