use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{NewOutboxRow, OutboxError, OutboxRow, Transition};

/// Something outbox rows can be inserted through: a transaction handle or
/// the store's default (autocommit) client.
#[async_trait]
pub trait OutboxWriter: Send + Sync {
    async fn insert(&self, row: NewOutboxRow) -> Result<OutboxRow, OutboxError>;
}

/// Durable outbox store.
pub trait OutboxStore: Send + Sync {
    /// Resolve the non-transactional client used when no transaction is given.
    fn default_client(&self) -> Arc<dyn OutboxWriter>;
}

/// Contract between the outbox table and the dispatchers draining it.
///
/// Several dispatchers, possibly in different processes, may drain the same
/// table. Every status change goes through [`transition`](Self::transition),
/// an atomic compare-and-swap on the row version, so at most one of them can
/// claim a given row.
#[async_trait]
pub trait OutboxClaims: Send + Sync {
    /// Rows in `PENDING` or `RETRY` that are due, plus `CLAIMED` rows whose
    /// lease has run out, most urgent first.
    async fn claimable(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxRow>, OutboxError>;

    /// Apply `change` only if the row is still at `expected_version` and the
    /// status change is allowed. A claim also requires the row to be
    /// claimable at `now`.
    async fn transition(
        &self,
        id: u64,
        expected_version: u64,
        change: Transition,
        now: DateTime<Utc>,
    ) -> Result<OutboxRow, OutboxError>;

    /// Claim up to `limit` due rows for `worker_id` until `lease_until`.
    /// Rows another dispatcher won in the meantime are skipped.
    async fn claim(
        &self,
        worker_id: &str,
        limit: usize,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxRow>, OutboxError> {
        let mut claimed = Vec::new();
        for row in self.claimable(limit, now).await? {
            let change = Transition::Claim {
                worker_id: worker_id.to_string(),
                until: lease_until,
            };
            match self.transition(row.id, row.version, change, now).await {
                Ok(row) => claimed.push(row),
                Err(err) if err.is_conflict() => {
                    debug!(row_id = row.id, worker_id, "row claimed elsewhere, skipping");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(claimed)
    }
}
