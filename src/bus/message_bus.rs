//! Message bus service: publish to the job queue, and the handshake protocol
//! on top of it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::handshake::{HandshakeReply, HandshakeWaiter, WaitingGuard};
use super::BusError;
use crate::cache::Cache;
use crate::envelope::{MessageEnvelope, PublishOptions};
use crate::keys;
use crate::queue::{Backoff, JobOptions, JobQueue};
use crate::settings::{DeliveryMode, MessageBusConfig};

/// Result of [`MessageBus::send`].
#[derive(Clone, Debug, PartialEq)]
pub enum Delivery {
    /// Fire-and-forget: the job was enqueued.
    Enqueued { job_id: String },
    /// Handshake: the consumer completed the request.
    Completed(HandshakeReply),
}

impl Delivery {
    pub fn job_id(&self) -> &str {
        match self {
            Delivery::Enqueued { job_id } => job_id,
            Delivery::Completed(reply) => &reply.job_id,
        }
    }
}

/// Publish/consume façade over a job queue and a cache.
///
/// Both collaborators are injected; clone-able handles (like
/// `InMemoryJobQueue` or an `Arc<dyn JobQueue>`) let tests keep a reference
/// for inspection.
///
/// ## Example
///
/// ```ignore
/// let bus = MessageBus::new(queue, cache, MessageBusConfig::default());
///
/// // Fire and forget
/// let job_id = bus
///     .publish("user-topic", "user.created", &user, PublishOptions::new().with_dedupe_key("u-1"))
///     .await?;
///
/// // Request / response
/// let reply = bus
///     .publish_and_wait("billing", "invoice.render", &req, PublishOptions::new().with_correlation_id("cid-1"))
///     .await?;
///
/// // ...and on the consumer side
/// bus.mark_done("cid-1", &json!({"status": "ok"}), 60).await?;
/// ```
pub struct MessageBus<Q, C> {
    queue: Q,
    cache: C,
    config: MessageBusConfig,
    waiting: Arc<AtomicUsize>,
}

impl<Q, C> MessageBus<Q, C> {
    pub fn new(queue: Q, cache: C, config: MessageBusConfig) -> Self {
        Self {
            queue,
            cache,
            config,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(&self) -> &MessageBusConfig {
        &self.config
    }

    /// Get a reference to the underlying job queue.
    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Get a reference to the underlying cache.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Number of `publish_and_wait` calls currently polling.
    pub fn waiting_handshakes(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Cache key the consumer writes to for `correlation_id`.
    pub fn build_handshake_key(&self, correlation_id: &str) -> String {
        keys::build_handshake_key(correlation_id)
    }
}

impl<Q: JobQueue, C: Cache> MessageBus<Q, C> {
    /// Publish `data` to `topic` and return the id the queue assigned.
    ///
    /// With a `dedupe_key` the requested job id is `"{topic}:{dedupe_key}"`,
    /// so a second publish of the same pair is coalesced by the queue.
    pub async fn publish<T>(
        &self,
        topic: &str,
        event_type: &str,
        data: T,
        options: PublishOptions,
    ) -> Result<String, BusError>
    where
        T: Serialize + Send + Sync,
    {
        let mut envelope = MessageEnvelope::new(topic, event_type, data);
        if let Some(correlation_id) = &options.correlation_id {
            envelope = envelope.with_correlation_id(correlation_id.clone());
        }
        self.publish_envelope(&envelope, &options).await
    }

    /// Publish an already built envelope, keeping its timestamp.
    pub async fn publish_envelope<T>(
        &self,
        envelope: &MessageEnvelope<T>,
        options: &PublishOptions,
    ) -> Result<String, BusError>
    where
        T: Serialize + Send + Sync,
    {
        let job_options = self.job_options(&envelope.topic, options);
        let requested = job_options.job_id.clone();
        let payload = serde_json::to_value(envelope)?;

        let handle = self
            .queue
            .add(&envelope.topic, payload, job_options)
            .await
            .map_err(|err| {
                warn!(topic = %envelope.topic, job_id = %requested, error = %err, "enqueue failed");
                BusError::from(err)
            })?;

        debug!(
            topic = %envelope.topic,
            event_type = %envelope.event_type,
            requested_job_id = %requested,
            job_id = %handle.id,
            "message published"
        );
        Ok(handle.id)
    }

    /// Publish, then poll the cache until the consumer calls
    /// [`mark_done`](Self::mark_done) for the same correlation id.
    ///
    /// A missing correlation id is generated. Timeout and poll interval fall
    /// back to the configured defaults. On timeout the job is left running.
    pub async fn publish_and_wait<T>(
        &self,
        topic: &str,
        event_type: &str,
        data: T,
        options: PublishOptions,
    ) -> Result<HandshakeReply, BusError>
    where
        T: Serialize + Send + Sync,
    {
        let correlation_id = options
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let timeout = options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.handshake_timeout());
        let poll_interval = options
            .poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.poll_interval());

        let options = PublishOptions {
            correlation_id: Some(correlation_id.clone()),
            ..options
        };
        let job_id = self.publish(topic, event_type, data, options).await?;

        let _waiting = WaitingGuard::enter(&self.waiting);
        let result = HandshakeWaiter::new(&self.cache, &correlation_id, timeout, poll_interval)
            .wait()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    warn!(%correlation_id, %job_id, ?timeout, "handshake timed out");
                }
                err
            })?;

        info!(%correlation_id, %job_id, "handshake completed");
        Ok(HandshakeReply {
            job_id,
            result,
            correlation_id,
        })
    }

    /// Consumer side of the handshake: store `result` for the waiting caller.
    ///
    /// Last write wins; callers complete each correlation id at most once.
    pub async fn mark_done<R>(
        &self,
        correlation_id: &str,
        result: &R,
        ttl_seconds: u64,
    ) -> Result<(), BusError>
    where
        R: Serialize + ?Sized,
    {
        let value = serde_json::to_value(result)?;
        self.cache
            .set(
                &keys::build_handshake_key(correlation_id),
                value,
                Duration::from_secs(ttl_seconds),
            )
            .await?;
        debug!(%correlation_id, ttl_seconds, "handshake marked done");
        Ok(())
    }

    /// [`mark_done`](Self::mark_done) with the configured
    /// `handshake_ttl_seconds`.
    pub async fn mark_done_default<R>(&self, correlation_id: &str, result: &R) -> Result<(), BusError>
    where
        R: Serialize + ?Sized,
    {
        self.mark_done(correlation_id, result, self.config.handshake_ttl_seconds)
            .await
    }

    /// Deliver using the configured default mode.
    pub async fn send<T>(
        &self,
        topic: &str,
        event_type: &str,
        data: T,
        options: PublishOptions,
    ) -> Result<Delivery, BusError>
    where
        T: Serialize + Send + Sync,
    {
        match self.config.default_mode {
            DeliveryMode::FireAndForget => {
                let job_id = self.publish(topic, event_type, data, options).await?;
                Ok(Delivery::Enqueued { job_id })
            }
            DeliveryMode::Handshake => {
                let reply = self.publish_and_wait(topic, event_type, data, options).await?;
                Ok(Delivery::Completed(reply))
            }
        }
    }

    fn job_options(&self, topic: &str, options: &PublishOptions) -> JobOptions {
        let job_id = match &options.dedupe_key {
            Some(dedupe_key) => keys::build_job_id(topic, dedupe_key),
            None => Uuid::new_v4().to_string(),
        };

        JobOptions {
            job_id,
            priority: options.priority,
            attempts: options.attempts,
            delay: options.delay_ms,
            backoff: Backoff::exponential(self.config.backoff_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::queue::InMemoryJobQueue;
    use serde_json::json;

    fn bus() -> MessageBus<InMemoryJobQueue, InMemoryCache> {
        MessageBus::new(
            InMemoryJobQueue::new(),
            InMemoryCache::new(),
            MessageBusConfig::default().with_backoff_delay_ms(250),
        )
    }

    #[tokio::test]
    async fn publish_wraps_data_in_envelope() {
        let bus = bus();
        let job_id = bus
            .publish("orders", "order.created", json!({"id": "o-1"}), PublishOptions::new())
            .await
            .unwrap();

        let job = bus.queue().job(&job_id).unwrap();
        assert_eq!(job.name, "orders");
        let envelope: MessageEnvelope<serde_json::Value> = job.decode().unwrap();
        assert_eq!(envelope.event_type, "order.created");
        assert_eq!(envelope.data, json!({"id": "o-1"}));
        assert!(envelope.correlation_id().is_none());
        assert_eq!(job.options.backoff, Backoff::exponential(250));
    }

    #[tokio::test]
    async fn publish_without_dedupe_key_generates_distinct_ids() {
        let bus = bus();
        let a = bus.publish("t", "e", 1, PublishOptions::new()).await.unwrap();
        let b = bus.publish("t", "e", 1, PublishOptions::new()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(bus.queue().len(), 2);
    }

    #[tokio::test]
    async fn dedupe_key_coalesces_at_queue() {
        let bus = bus();
        let options = PublishOptions::new().with_dedupe_key("k");
        let a = bus.publish("t", "e", json!(1), options.clone()).await.unwrap();
        let b = bus.publish("t", "e", json!(2), options).await.unwrap();
        assert_eq!(a, "t:k");
        assert_eq!(a, b);
        assert_eq!(bus.queue().len(), 1);
    }

    #[tokio::test]
    async fn correlation_id_lands_in_envelope_meta() {
        let bus = bus();
        let job_id = bus
            .publish("t", "e", (), PublishOptions::new().with_correlation_id("cid-9"))
            .await
            .unwrap();
        let envelope: MessageEnvelope<()> = bus.queue().job(&job_id).unwrap().decode().unwrap();
        assert_eq!(envelope.correlation_id(), Some("cid-9"));
    }

    #[tokio::test]
    async fn mark_done_writes_handshake_slot() {
        let bus = bus();
        bus.mark_done("cid-1", &json!({"status": "ok"}), 5).await.unwrap();
        let stored = bus.cache().get(&bus.build_handshake_key("cid-1")).await.unwrap();
        assert_eq!(stored, Some(json!({"status": "ok"})));
    }

    #[tokio::test(start_paused = true)]
    async fn mark_done_default_uses_configured_ttl() {
        let bus = MessageBus::new(
            InMemoryJobQueue::new(),
            InMemoryCache::new(),
            MessageBusConfig::default().with_handshake_ttl_seconds(2),
        );
        let key = bus.build_handshake_key("cid-d");
        bus.mark_done_default("cid-d", &json!("ok")).await.unwrap();

        tokio::time::advance(Duration::from_millis(1900)).await;
        assert_eq!(bus.cache().get(&key).await.unwrap(), Some(json!("ok")));

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(bus.cache().get(&key).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn send_uses_default_mode() {
        let bus = bus();
        let delivery = bus.send("t", "e", 1, PublishOptions::new()).await.unwrap();
        assert!(matches!(delivery, Delivery::Enqueued { .. }));

        let handshake_bus = Arc::new(MessageBus::new(
            InMemoryJobQueue::new(),
            InMemoryCache::new(),
            MessageBusConfig::default().with_default_mode(DeliveryMode::Handshake),
        ));
        let consumer = Arc::clone(&handshake_bus);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            consumer.mark_done("cid-s", &json!({"done": true}), 5).await.unwrap();
        });

        let delivery = handshake_bus
            .send("t", "e", 1, PublishOptions::new().with_correlation_id("cid-s"))
            .await
            .unwrap();
        match delivery {
            Delivery::Completed(reply) => assert_eq!(reply.result, json!({"done": true})),
            other => panic!("expected completed handshake, got {:?}", other),
        }
    }
}
