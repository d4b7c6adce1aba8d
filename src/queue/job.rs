use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Retry delay policy attached to a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Exponential,
    Fixed,
}

/// Backoff policy: `{ "type": "exponential", "delay": <ms> }`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    #[serde(rename = "type")]
    pub kind: BackoffKind,
    /// Base delay in milliseconds.
    pub delay: u64,
}

impl Backoff {
    pub fn exponential(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay: delay_ms,
        }
    }

    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            delay: delay_ms,
        }
    }

    /// Delay before the next attempt, given how many attempts already ran.
    ///
    /// Exponential backoff doubles per attempt: base, 2×base, 4×base, ...
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let millis = match self.kind {
            BackoffKind::Fixed => self.delay,
            BackoffKind::Exponential => {
                let exponent = attempts_made.saturating_sub(1).min(32);
                self.delay.saturating_mul(1u64 << exponent)
            }
        };
        Duration::from_millis(millis)
    }
}

/// Options passed to [`JobQueue::add`](super::JobQueue::add).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    /// Requested job id. Adding a second job with the same id is a no-op.
    pub job_id: String,
    pub priority: Option<i32>,
    pub attempts: Option<u32>,
    /// Milliseconds before the job becomes visible to workers.
    pub delay: Option<u64>,
    pub backoff: Backoff,
}

impl JobOptions {
    /// Attempts allowed for the job; at least one.
    pub fn max_attempts(&self) -> u32 {
        self.attempts.unwrap_or(1).max(1)
    }
}

/// Queue-assigned identity of an enqueued job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
}

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

/// A job as seen by a worker.
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    pub id: String,
    /// Queue name; the bus uses the topic.
    pub name: String,
    pub payload: Value,
    pub options: JobOptions,
    pub state: JobState,
    pub attempts_made: u32,
    pub failed_reason: Option<String>,
}

impl Job {
    /// Decode the payload, typically into a `MessageEnvelope<T>`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, JobState::Completed | JobState::Failed)
    }
}
