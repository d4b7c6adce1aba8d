use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use super::{NewOutboxRow, OutboxError, OutboxRow, OutboxStore, OutboxWriter};
use crate::clock::utc_after_millis;
use crate::envelope::{MessageEnvelope, PublishOptions};

/// Records envelopes into the outbox.
///
/// Inside a business transaction pass its handle as `tx`; the row then
/// commits or rolls back with the business writes. Without one the store's
/// default client inserts it right away.
pub struct OutboxService<S> {
    store: Arc<S>,
}

impl<S> Clone for OutboxService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: OutboxStore> OutboxService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Persist `envelope` as a `PENDING` outbox row.
    ///
    /// `options.correlation_id` wins over the envelope's own. A duplicate
    /// `dedupe_key` fails with [`OutboxError::DuplicateRecord`]; nothing is
    /// enqueued here.
    pub async fn record<T>(
        &self,
        envelope: &MessageEnvelope<T>,
        options: &PublishOptions,
        tx: Option<&dyn OutboxWriter>,
    ) -> Result<OutboxRow, OutboxError>
    where
        T: Serialize + Sync,
    {
        let row = Self::new_row(envelope, options)?;

        let inserted = match tx {
            Some(writer) => writer.insert(row).await,
            None => self.store.default_client().insert(row).await,
        };

        match &inserted {
            Ok(row) => debug!(
                row_id = row.id,
                topic = %row.topic,
                event_type = %row.event_type,
                transactional = tx.is_some(),
                "outbox row recorded"
            ),
            Err(err) if err.is_duplicate() => {
                debug!(topic = %envelope.topic, error = %err, "outbox row already recorded")
            }
            Err(err) => warn!(topic = %envelope.topic, error = %err, "outbox insert failed"),
        }
        inserted
    }

    /// Like [`record`](Self::record), but a duplicate dedupe key is reported
    /// as `Ok(None)` instead of an error.
    pub async fn record_once<T>(
        &self,
        envelope: &MessageEnvelope<T>,
        options: &PublishOptions,
        tx: Option<&dyn OutboxWriter>,
    ) -> Result<Option<OutboxRow>, OutboxError>
    where
        T: Serialize + Sync,
    {
        match self.record(envelope, options, tx).await {
            Ok(row) => Ok(Some(row)),
            Err(err) if err.is_duplicate() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn new_row<T: Serialize>(
        envelope: &MessageEnvelope<T>,
        options: &PublishOptions,
    ) -> Result<NewOutboxRow, OutboxError> {
        let correlation_id = options
            .correlation_id
            .clone()
            .or_else(|| envelope.meta.correlation_id.clone());
        let deliver_at = options
            .delay_ms
            .map(|ms| utc_after_millis(Utc::now(), ms));

        Ok(NewOutboxRow {
            topic: envelope.topic.clone(),
            event_type: envelope.event_type.clone(),
            payload: serde_json::to_value(&envelope.data)?,
            occurred_at: envelope.timestamp().to_string(),
            dedupe_key: options.dedupe_key.clone(),
            correlation_id,
            partition_key: options.partition_key.clone(),
            priority: options.priority,
            max_attempts: options.attempts,
            deliver_at,
        })
    }
}
