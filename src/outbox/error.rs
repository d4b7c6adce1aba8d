use thiserror::Error;

use super::OutboxStatus;

/// Error type for outbox persistence.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// Unique constraint on `dedupe_key` violated. Idempotent callers treat
    /// this as "already recorded".
    #[error("outbox row with dedupe key {dedupe_key} already exists")]
    DuplicateRecord { dedupe_key: String },
    /// Any other persistence failure. Never swallowed.
    #[error("outbox store failure: {0}")]
    StoreFailure(String),
    /// Another dispatcher changed the row first.
    #[error("outbox row {id} changed concurrently (expected version {expected}, got {actual})")]
    VersionConflict { id: u64, expected: u64, actual: u64 },
    #[error("outbox row {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: u64,
        from: OutboxStatus,
        to: OutboxStatus,
    },
    #[error("outbox row not found: {0}")]
    NotFound(u64),
    #[error("outbox store lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("outbox payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OutboxError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, OutboxError::DuplicateRecord { .. })
    }

    /// Lost a claim or transition race; safe to skip the row.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            OutboxError::VersionConflict { .. } | OutboxError::InvalidTransition { .. }
        )
    }
}
