//! Job queue doubles.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use outbox_bus::{JobHandle, JobOptions, JobQueue, QueueError};
use serde_json::Value;

/// One call to `JobQueue::add`.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedAdd {
    pub name: String,
    pub payload: Value,
    pub options: JobOptions,
}

/// Records every add and answers with scripted job ids, falling back to the
/// requested id once the script runs out.
#[derive(Clone, Default)]
pub struct RecordingQueue {
    adds: Arc<Mutex<Vec<RecordedAdd>>>,
    ids: Arc<Mutex<VecDeque<String>>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn returning<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue = Self::new();
        queue
            .ids
            .lock()
            .unwrap()
            .extend(ids.into_iter().map(Into::into));
        queue
    }

    pub fn adds(&self) -> Vec<RecordedAdd> {
        self.adds.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<RecordedAdd> {
        self.adds.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn add(
        &self,
        name: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobHandle, QueueError> {
        let id = self
            .ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| options.job_id.clone());
        self.adds.lock().unwrap().push(RecordedAdd {
            name: name.to_string(),
            payload,
            options,
        });
        Ok(JobHandle::new(id))
    }
}

/// Rejects every add as if the broker were unreachable.
#[derive(Clone, Default)]
pub struct FailingQueue {
    calls: Arc<AtomicUsize>,
}

impl FailingQueue {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobQueue for FailingQueue {
    async fn add(
        &self,
        _name: &str,
        _payload: Value,
        _options: JobOptions,
    ) -> Result<JobHandle, QueueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(QueueError::ConnectionFailed("broker unreachable".into()))
    }
}

/// Fails the first `failures` adds, then delegates to a [`RecordingQueue`].
#[derive(Clone)]
pub struct FlakyQueue {
    remaining_failures: Arc<AtomicUsize>,
    inner: RecordingQueue,
}

impl FlakyQueue {
    pub fn new(failures: usize) -> Self {
        Self {
            remaining_failures: Arc::new(AtomicUsize::new(failures)),
            inner: RecordingQueue::new(),
        }
    }

    pub fn adds(&self) -> Vec<RecordedAdd> {
        self.inner.adds()
    }
}

#[async_trait]
impl JobQueue for FlakyQueue {
    async fn add(
        &self,
        name: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobHandle, QueueError> {
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(QueueError::ConnectionFailed("broker unreachable".into()));
        }
        self.inner.add(name, payload, options).await
    }
}
