//! Message envelope and per-publish options.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Current instant as an ISO-8601 UTC string with millisecond precision.
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Envelope metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    /// Present only for handshake-style calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    timestamp: String,
}

impl EnvelopeMeta {
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }
}

/// The unit of communication on the bus.
///
/// The timestamp is fixed when the envelope is built and has no setter; it
/// takes part in dedupe-key derivation downstream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub topic: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: T,
    pub meta: EnvelopeMeta,
}

impl<T> MessageEnvelope<T> {
    /// Build an envelope stamped with the current instant.
    pub fn new(topic: impl Into<String>, event_type: impl Into<String>, data: T) -> Self {
        Self::at(topic, event_type, data, iso_timestamp())
    }

    /// Rebuild an envelope whose timestamp is already known (e.g. from an outbox row).
    pub fn at(
        topic: impl Into<String>,
        event_type: impl Into<String>,
        data: T,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            event_type: event_type.into(),
            data,
            meta: EnvelopeMeta {
                correlation_id: None,
                timestamp: timestamp.into(),
            },
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.meta.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn timestamp(&self) -> &str {
        self.meta.timestamp()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.meta.correlation_id.as_deref()
    }
}

/// Per-publish configuration. Every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOptions {
    pub dedupe_key: Option<String>,
    pub partition_key: Option<String>,
    /// Higher is more urgent.
    pub priority: Option<i32>,
    /// Maximum delivery attempts.
    pub attempts: Option<u32>,
    pub delay_ms: Option<u64>,
    pub correlation_id: Option<String>,
    pub timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = Some(poll_interval_ms);
        self
    }
}
