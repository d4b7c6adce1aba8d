use async_trait::async_trait;
use serde_json::Value;

use super::{JobHandle, JobOptions, QueueError};

/// Job queue collaborator.
///
/// Implementations might include:
/// - `InMemoryJobQueue` - for tests and single-process deployments
/// - a Redis-backed queue consumed by a separate worker process
///
/// Adding a job whose `job_id` is already known must not create a second
/// job. The handle returned is authoritative: callers use its id, not the
/// one they requested.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn add(
        &self,
        name: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobHandle, QueueError>;
}

#[async_trait]
impl<Q: JobQueue + ?Sized> JobQueue for std::sync::Arc<Q> {
    async fn add(
        &self,
        name: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobHandle, QueueError> {
        (**self).add(name, payload, options).await
    }
}
