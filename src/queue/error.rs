use thiserror::Error;

/// Error type for job queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Connection to the queue backend failed.
    #[error("queue connection failed: {0}")]
    ConnectionFailed(String),
    /// The queue refused the job.
    #[error("job rejected: {0}")]
    Rejected(String),
    /// The payload could not be encoded or decoded.
    #[error("job serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The in-process queue state was poisoned by a panicking writer.
    #[error("queue lock poisoned during {0}")]
    LockPoisoned(&'static str),
    /// No job with this id is known to the queue.
    #[error("job not found: {0}")]
    NotFound(String),
}
