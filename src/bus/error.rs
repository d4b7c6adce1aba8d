use std::time::Duration;

use thiserror::Error;

use crate::cache::CacheError;
use crate::queue::QueueError;

/// Error type for message bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// The job queue rejected or failed the enqueue. Not retried here.
    #[error("enqueue failed: {0}")]
    Enqueue(#[from] QueueError),
    /// No handshake result appeared in time. The job itself keeps running.
    #[error("handshake {correlation_id} timed out after {elapsed:?}")]
    HandshakeTimeout {
        correlation_id: String,
        elapsed: Duration,
    },
    /// Reading or writing the handshake slot failed.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    /// The envelope or result could not be converted to JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BusError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BusError::HandshakeTimeout { .. })
    }

    /// Correlation id of a timed-out handshake.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            BusError::HandshakeTimeout { correlation_id, .. } => Some(correlation_id),
            _ => None,
        }
    }
}
