use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{OutboxClaims, OutboxError, OutboxRow, Transition};
use crate::bus::MessageBus;
use crate::cache::Cache;
use crate::clock::utc_after;
use crate::metrics::OutboxMetrics;
use crate::queue::{Backoff, JobQueue};

/// Result of one dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchResult {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub dead: usize,
    /// Rows whose outcome could not be written back. They stay `CLAIMED`
    /// and are picked up again once the lease runs out.
    pub unsettled: usize,
}

impl DispatchResult {
    fn absorb(&mut self, other: DispatchResult) {
        self.claimed += other.claimed;
        self.sent += other.sent;
        self.retried += other.retried;
        self.dead += other.dead;
        self.unsettled += other.unsettled;
    }
}

/// Drains the outbox into the message bus.
///
/// Rows are claimed through a compare-and-swap, so several dispatchers may
/// share one store. A failed publish goes to `RETRY` with an exponential
/// delay based on `backoff_delay_ms`, and to `DEAD` once the row has been
/// claimed `max_attempts` times.
///
/// Each claim holds a lease. If the dispatcher dies before settling a row,
/// any dispatcher may claim it again once the lease has run out.
pub struct OutboxDispatcher<S, Q, C> {
    store: Arc<S>,
    bus: Arc<MessageBus<Q, C>>,
    metrics: Arc<OutboxMetrics>,
    worker_id: String,
    batch_size: usize,
    max_attempts: u32,
    lease: Duration,
}

impl<S, Q, C> OutboxDispatcher<S, Q, C> {
    pub fn new(store: Arc<S>, bus: Arc<MessageBus<Q, C>>, metrics: Arc<OutboxMetrics>) -> Self {
        Self {
            store,
            bus,
            metrics,
            worker_id: format!("dispatcher-{}", std::process::id()),
            batch_size: 10,
            max_attempts: 3,
            lease: Duration::from_secs(60),
        }
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Claims allowed before a failing row is dead-lettered.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    /// How long a claim is held before other dispatchers may take the row.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn metrics(&self) -> &Arc<OutboxMetrics> {
        &self.metrics
    }
}

impl<S, Q, C> OutboxDispatcher<S, Q, C>
where
    S: OutboxClaims,
    Q: JobQueue,
    C: Cache,
{
    /// Claim one batch and publish every claimed row.
    ///
    /// Rows that already used up their attempts are dead-lettered first,
    /// without publishing. Publish failures are recorded on the row. A failed
    /// claim aborts the pass and is returned; a failed write-back is logged,
    /// counted as unsettled and the pass goes on with the next row.
    pub async fn dispatch_once(&self) -> Result<DispatchResult, OutboxError> {
        let now = Utc::now();
        let mut result = DispatchResult::default();
        self.retire_exhausted(now, &mut result).await?;

        let rows = self
            .store
            .claim(
                &self.worker_id,
                self.batch_size,
                utc_after(now, self.lease),
                now,
            )
            .await?;

        result.claimed = rows.len();
        if rows.is_empty() {
            return Ok(result);
        }
        self.metrics.record_claimed(rows.len() as u64);
        debug!(worker_id = %self.worker_id, claimed = rows.len(), "outbox rows claimed");

        for row in rows {
            let started = Instant::now();
            let published = self
                .bus
                .publish_envelope(&row.envelope(), &row.publish_options(Utc::now()))
                .await;

            match published {
                Ok(job_id) => {
                    if self.settle(&row, Transition::Sent, &mut result).await {
                        self.metrics.record_sent(started.elapsed());
                        result.sent += 1;
                        debug!(row_id = row.id, %job_id, topic = %row.topic, "outbox row sent");
                    }
                }
                Err(err) if row.attempts >= self.max_attempts => {
                    let change = Transition::Dead {
                        error: err.to_string(),
                    };
                    if self.settle(&row, change, &mut result).await {
                        self.metrics.record_dead();
                        result.dead += 1;
                        warn!(row_id = row.id, attempts = row.attempts, error = %err, "outbox row dead-lettered");
                    }
                }
                Err(err) => {
                    let delay = Backoff::exponential(self.bus.config().backoff_delay_ms)
                        .delay_for(row.attempts);
                    let change = Transition::Retry {
                        error: err.to_string(),
                        retry_at: Some(utc_after(Utc::now(), delay)),
                    };
                    if self.settle(&row, change, &mut result).await {
                        self.metrics.record_retry();
                        result.retried += 1;
                        debug!(row_id = row.id, attempts = row.attempts, ?delay, error = %err, "outbox row scheduled for retry");
                    }
                }
            }
        }

        Ok(result)
    }

    /// Dead-letter waiting rows that have no attempts left, e.g. after
    /// `max_attempts` was lowered or a dispatcher died on the last attempt.
    async fn retire_exhausted(
        &self,
        now: DateTime<Utc>,
        result: &mut DispatchResult,
    ) -> Result<(), OutboxError> {
        let exhausted = self
            .store
            .claimable(self.batch_size, now)
            .await?
            .into_iter()
            .filter(|row| row.attempts >= self.max_attempts);

        for row in exhausted {
            let error = row
                .last_error
                .clone()
                .unwrap_or_else(|| "delivery attempts exhausted".to_string());
            if self.settle(&row, Transition::Dead { error }, result).await {
                self.metrics.record_dead();
                result.dead += 1;
                warn!(row_id = row.id, attempts = row.attempts, status = ?row.status, "exhausted outbox row dead-lettered");
            }
        }
        Ok(())
    }

    /// `true` when the change was written. Lost races are skipped; other
    /// store failures are counted as unsettled.
    async fn settle(&self, row: &OutboxRow, change: Transition, result: &mut DispatchResult) -> bool {
        match self
            .store
            .transition(row.id, row.version, change, Utc::now())
            .await
        {
            Ok(_) => true,
            Err(err) if err.is_conflict() => {
                warn!(row_id = row.id, error = %err, "outbox row changed while dispatching");
                false
            }
            Err(err) => {
                result.unsettled += 1;
                warn!(row_id = row.id, error = %err, "failed to settle outbox row");
                false
            }
        }
    }
}

impl<S, Q, C> OutboxDispatcher<S, Q, C>
where
    S: OutboxClaims + 'static,
    Q: JobQueue + 'static,
    C: Cache + 'static,
{
    /// Run [`dispatch_once`](Self::dispatch_once) every `poll_interval` on a
    /// tokio task until the returned handle is stopped.
    pub fn spawn(self, poll_interval: Duration) -> DispatcherHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut stats = DispatcherStats::default();
            let mut ticker = tokio::time::interval(poll_interval);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {}
                }

                stats.polls += 1;
                match self.dispatch_once().await {
                    Ok(pass) => stats.totals.absorb(pass),
                    Err(err) => {
                        stats.errors += 1;
                        warn!(worker_id = %self.worker_id, error = %err, "outbox dispatch pass failed");
                    }
                }
            }

            info!(
                worker_id = %self.worker_id,
                sent = stats.totals.sent,
                dead = stats.totals.dead,
                unsettled = stats.totals.unsettled,
                "outbox dispatcher stopped"
            );
            stats
        });

        DispatcherHandle {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }
}

/// Statistics from a spawned dispatcher.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatcherStats {
    pub totals: DispatchResult,
    pub polls: usize,
    pub errors: usize,
}

/// Handle to a dispatcher started with [`OutboxDispatcher::spawn`].
pub struct DispatcherHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<DispatcherStats>>,
}

impl DispatcherHandle {
    /// Signal the dispatcher to stop and wait for the current pass to finish.
    pub async fn stop(mut self) -> DispatcherStats {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => DispatcherStats::default(),
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::envelope::{MessageEnvelope, PublishOptions};
    use crate::outbox::{InMemoryOutboxStore, OutboxService, OutboxStatus};
    use crate::queue::InMemoryJobQueue;
    use crate::settings::MessageBusConfig;
    use serde_json::{json, Value};

    type Bus = MessageBus<InMemoryJobQueue, InMemoryCache>;

    fn setup() -> (Arc<InMemoryOutboxStore>, Arc<Bus>, Arc<OutboxMetrics>) {
        let bus = MessageBus::new(
            InMemoryJobQueue::new(),
            InMemoryCache::new(),
            MessageBusConfig::default(),
        );
        (
            Arc::new(InMemoryOutboxStore::new()),
            Arc::new(bus),
            Arc::new(OutboxMetrics::new().unwrap()),
        )
    }

    async fn record(store: &Arc<InMemoryOutboxStore>, n: i32) {
        OutboxService::new(store.clone())
            .record(&MessageEnvelope::new("t", "e", n), &PublishOptions::new(), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sends_pending_rows_to_queue() {
        let (store, bus, metrics) = setup();
        let service = OutboxService::new(store.clone());
        let envelope = MessageEnvelope::new("payments", "payment.completed", json!({"amount": 5}));
        service
            .record(&envelope, &PublishOptions::new().with_dedupe_key("pay-1").with_priority(4), None)
            .await
            .unwrap();

        let dispatcher = OutboxDispatcher::new(store.clone(), bus.clone(), metrics.clone());
        let result = dispatcher.dispatch_once().await.unwrap();

        assert_eq!(result, DispatchResult { claimed: 1, sent: 1, ..Default::default() });
        assert_eq!(store.rows_with_status(OutboxStatus::Sent).unwrap().len(), 1);

        let job = bus.queue().job("payments:pay-1").unwrap();
        assert_eq!(job.options.priority, Some(4));
        let published: MessageEnvelope<Value> = job.decode().unwrap();
        assert_eq!(published.timestamp(), envelope.timestamp());
        assert_eq!(published.data, json!({"amount": 5}));

        let counters = metrics.counters();
        assert_eq!(counters.claimed, 1);
        assert_eq!(counters.sent, 1);
        assert_eq!(counters.dispatch_count, 1);
    }

    #[tokio::test]
    async fn empty_outbox_is_a_noop() {
        let (store, bus, metrics) = setup();
        let dispatcher = OutboxDispatcher::new(store, bus, metrics.clone());
        assert_eq!(dispatcher.dispatch_once().await.unwrap(), DispatchResult::default());
        assert_eq!(metrics.counters().claimed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_dispatcher_drains_and_stops() {
        let (store, bus, metrics) = setup();
        let service = OutboxService::new(store.clone());
        for n in 0..3 {
            service
                .record(&MessageEnvelope::new("t", "e", n), &PublishOptions::new(), None)
                .await
                .unwrap();
        }

        let handle = OutboxDispatcher::new(store.clone(), bus.clone(), metrics)
            .with_batch_size(2)
            .spawn(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = handle.stop().await;

        assert_eq!(stats.totals.sent, 3);
        assert_eq!(stats.errors, 0);
        assert!(stats.polls >= 2);
        assert_eq!(bus.queue().len(), 3);
    }

    #[tokio::test]
    async fn crashed_claim_is_recovered_after_lease() {
        let (store, bus, metrics) = setup();
        record(&store, 1).await;
        record(&store, 2).await;
        let now = Utc::now();
        let live = store
            .claim("crashed", 1, now + chrono::Duration::seconds(60), now)
            .await
            .unwrap()
            .remove(0);
        let expired = store
            .claim("crashed", 1, now - chrono::Duration::seconds(1), now)
            .await
            .unwrap()
            .remove(0);

        let result = OutboxDispatcher::new(store.clone(), bus.clone(), metrics)
            .with_worker_id("w-2")
            .dispatch_once()
            .await
            .unwrap();

        assert_eq!(result, DispatchResult { claimed: 1, sent: 1, ..Default::default() });
        let recovered = store.row(expired.id).unwrap().unwrap();
        assert_eq!(recovered.status, OutboxStatus::Sent);
        assert_eq!(recovered.attempts, 2);
        assert!(recovered.claimed_until.is_none());

        let held = store.row(live.id).unwrap().unwrap();
        assert_eq!(held.status, OutboxStatus::Claimed);
        assert_eq!(held.claimed_by.as_deref(), Some("crashed"));
        assert_eq!(bus.queue().len(), 1);
    }

    /// Fails every write-back that is not a claim.
    struct FailingSettle(InMemoryOutboxStore);

    #[async_trait::async_trait]
    impl OutboxClaims for FailingSettle {
        async fn claimable(
            &self,
            limit: usize,
            now: DateTime<Utc>,
        ) -> Result<Vec<OutboxRow>, OutboxError> {
            self.0.claimable(limit, now).await
        }

        async fn transition(
            &self,
            id: u64,
            expected_version: u64,
            change: Transition,
            now: DateTime<Utc>,
        ) -> Result<OutboxRow, OutboxError> {
            match change {
                Transition::Claim { .. } => self.0.transition(id, expected_version, change, now).await,
                _ => Err(OutboxError::StoreFailure("connection reset".into())),
            }
        }
    }

    #[tokio::test]
    async fn settle_failure_does_not_strand_the_batch() {
        let (store, bus, metrics) = setup();
        for n in 0..3 {
            record(&store, n).await;
        }
        let failing = Arc::new(FailingSettle((*store).clone()));

        let result = OutboxDispatcher::new(failing, bus.clone(), metrics.clone())
            .dispatch_once()
            .await
            .unwrap();

        assert_eq!(result.claimed, 3);
        assert_eq!(result.sent, 0);
        assert_eq!(result.unsettled, 3);
        assert_eq!(bus.queue().len(), 3);
        assert_eq!(store.rows_with_status(OutboxStatus::Claimed).unwrap().len(), 3);
        assert_eq!(metrics.counters().sent, 0);
    }

    #[tokio::test]
    async fn exhausted_retry_rows_are_dead_lettered_without_publishing() {
        let (store, bus, metrics) = setup();
        record(&store, 1).await;
        let now = Utc::now();
        let claimed = store
            .claim("w-old", 10, now + chrono::Duration::seconds(60), now)
            .await
            .unwrap()
            .remove(0);
        store
            .transition(
                claimed.id,
                claimed.version,
                Transition::Retry {
                    error: "queue down".into(),
                    retry_at: None,
                },
                now,
            )
            .await
            .unwrap();

        let result = OutboxDispatcher::new(store.clone(), bus.clone(), metrics.clone())
            .with_max_attempts(1)
            .dispatch_once()
            .await
            .unwrap();

        assert_eq!(result, DispatchResult { dead: 1, ..Default::default() });
        let row = store.row(claimed.id).unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Dead);
        assert_eq!(row.last_error.as_deref(), Some("queue down"));
        assert!(bus.queue().is_empty());
        assert_eq!(metrics.counters().dead, 1);
    }
}
