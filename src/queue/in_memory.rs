//! In-memory job queue for testing and single-process scenarios.
//!
//! Behaves like a small job broker:
//! - job ids are unique; re-adding a known id returns the original handle
//! - higher `priority` is taken first, ties go to the oldest job
//! - `delay` hides a job until it elapses
//! - failed jobs are rescheduled with their backoff until `attempts` run out

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::{Job, JobHandle, JobOptions, JobQueue, JobState, QueueError};
use crate::clock::instant_after;

struct Slot {
    job: Job,
    seq: u64,
    available_at: Instant,
}

#[derive(Default)]
struct QueueState {
    slots: HashMap<String, Slot>,
    next_seq: u64,
}

/// Thread-safe in-memory job queue. Clones share the same jobs.
///
/// ## Example
///
/// ```
/// use outbox_bus::queue::{Backoff, InMemoryJobQueue, JobOptions, JobQueue};
/// use serde_json::json;
///
/// # tokio_test_block_on(async {
/// let queue = InMemoryJobQueue::new();
/// let options = JobOptions {
///     job_id: "orders:o-1".into(),
///     priority: None,
///     attempts: Some(3),
///     delay: None,
///     backoff: Backoff::exponential(100),
/// };
///
/// let first = queue.add("orders", json!({"n": 1}), options.clone()).await.unwrap();
/// let second = queue.add("orders", json!({"n": 2}), options).await.unwrap();
/// assert_eq!(first, second);
/// assert_eq!(queue.len(), 1);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::LockPoisoned(operation))
    }

    /// Take the most urgent visible job with the given name and mark it active.
    pub fn take(&self, name: &str) -> Result<Option<Job>, QueueError> {
        let mut state = self.lock("take")?;
        let now = Instant::now();

        let next_id = state
            .slots
            .values()
            .filter(|slot| slot.job.name == name)
            .filter(|slot| matches!(slot.job.state, JobState::Waiting | JobState::Delayed))
            .filter(|slot| slot.available_at <= now)
            .max_by(|a, b| {
                let pa = a.job.options.priority.unwrap_or(0);
                let pb = b.job.options.priority.unwrap_or(0);
                pa.cmp(&pb).then(b.seq.cmp(&a.seq))
            })
            .map(|slot| slot.job.id.clone());

        let Some(id) = next_id else {
            return Ok(None);
        };

        let slot = state
            .slots
            .get_mut(&id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        slot.job.state = JobState::Active;
        slot.job.attempts_made += 1;
        Ok(Some(slot.job.clone()))
    }

    /// Wait up to `timeout` for a job with the given name.
    pub async fn next(&self, name: &str, timeout: Duration) -> Result<Option<Job>, QueueError> {
        let deadline = instant_after(timeout);

        loop {
            if let Some(job) = self.take(name)? {
                return Ok(Some(job));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            // Small sleep to avoid busy-waiting
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Mark an active job as completed.
    pub fn complete(&self, id: &str) -> Result<(), QueueError> {
        let mut state = self.lock("complete")?;
        let slot = state
            .slots
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        slot.job.state = JobState::Completed;
        slot.job.failed_reason = None;
        Ok(())
    }

    /// Record a failed attempt. The job is rescheduled with its backoff while
    /// attempts remain, otherwise it ends `Failed`. Returns the new state.
    pub fn fail(&self, id: &str, reason: impl Into<String>) -> Result<JobState, QueueError> {
        let mut state = self.lock("fail")?;
        let slot = state
            .slots
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        slot.job.failed_reason = Some(reason.into());
        if slot.job.attempts_made < slot.job.options.max_attempts() {
            let wait = slot.job.options.backoff.delay_for(slot.job.attempts_made);
            slot.available_at = instant_after(wait);
            slot.job.state = JobState::Delayed;
            debug!(job_id = %id, attempts_made = slot.job.attempts_made, ?wait, "job rescheduled");
        } else {
            slot.job.state = JobState::Failed;
        }
        Ok(slot.job.state)
    }

    /// Look up a job by id.
    pub fn job(&self, id: &str) -> Option<Job> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.slots.get(id).map(|slot| slot.job.clone()))
    }

    /// All jobs in insertion order.
    pub fn jobs(&self) -> Vec<Job> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let mut slots: Vec<&Slot> = state.slots.values().collect();
        slots.sort_by_key(|slot| slot.seq);
        slots.into_iter().map(|slot| slot.job.clone()).collect()
    }

    /// All jobs with the given name, in insertion order.
    pub fn find_all_by_name(&self, name: &str) -> Vec<Job> {
        self.jobs().into_iter().filter(|job| job.name == name).collect()
    }

    /// Jobs currently in the given state.
    pub fn count_in_state(&self, job_state: JobState) -> usize {
        self.state
            .lock()
            .map(|state| {
                state
                    .slots
                    .values()
                    .filter(|slot| slot.job.state == job_state)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn add(
        &self,
        name: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobHandle, QueueError> {
        let mut state = self.lock("add")?;

        let id = if options.job_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            options.job_id.clone()
        };

        if let Some(existing) = state.slots.get(&id) {
            debug!(job_id = %id, "job id already queued, coalescing");
            return Ok(JobHandle::new(existing.job.id.clone()));
        }

        let delay = options.delay.unwrap_or(0);
        let job = Job {
            id: id.clone(),
            name: name.to_string(),
            payload,
            options,
            state: if delay > 0 {
                JobState::Delayed
            } else {
                JobState::Waiting
            },
            attempts_made: 0,
            failed_reason: None,
        };

        let seq = state.next_seq;
        state.next_seq += 1;
        state.slots.insert(
            id.clone(),
            Slot {
                job,
                seq,
                available_at: instant_after(Duration::from_millis(delay)),
            },
        );

        Ok(JobHandle::new(id))
    }
}
