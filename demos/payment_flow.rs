//! Payment flow over the outbox-backed bus.
//!
//! Run with `RUST_LOG=outbox_bus=debug cargo run --example payment_flow`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use outbox_bus::{
    build_event_dedupe_key, DedupeGuard, HandlerError, InMemoryCache, InMemoryJobQueue,
    InMemoryOutboxStore, Job, JobHandler, JobWorker, MessageBus, MessageEnvelope,
    OutboxDispatcher, OutboxMetrics, OutboxService, PublishOptions, Settings,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentCompleted {
    user_id: String,
    payment_id: String,
    amount: u64,
}

struct Notifier {
    bus: Arc<MessageBus<InMemoryJobQueue, InMemoryCache>>,
    dedupe: DedupeGuard<InMemoryCache>,
}

#[async_trait]
impl JobHandler for Notifier {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        let envelope: MessageEnvelope<PaymentCompleted> = job.decode()?;
        let payment = &envelope.data;
        let key = build_event_dedupe_key(
            &payment.user_id,
            envelope.timestamp(),
            Some(&payment.payment_id),
        );

        if self.dedupe.first_delivery(&key).await? {
            info!(payment_id = %payment.payment_id, amount = payment.amount, "sending receipt");
        }

        if let Some(correlation_id) = envelope.correlation_id() {
            self.bus
                .mark_done_default(correlation_id, &json!({"receipt": payment.payment_id}))
                .await?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> outbox_bus::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = Settings::load()?;
    let queue = InMemoryJobQueue::new();
    let cache = InMemoryCache::new();
    let bus = Arc::new(MessageBus::new(
        queue.clone(),
        cache.clone(),
        settings.message_bus,
    ));

    let worker = JobWorker::spawn(
        queue.clone(),
        "payments",
        Notifier {
            bus: bus.clone(),
            dedupe: DedupeGuard::new(cache.clone(), Duration::from_secs(3600)),
        },
        Duration::from_millis(10),
    );

    // Business transaction: payment state and its event commit together.
    let store = Arc::new(InMemoryOutboxStore::new());
    let outbox = OutboxService::new(store.clone());
    let tx = store.begin();
    tx.put_entity("payment:p-1", json!({"status": "completed"}))?;
    let event = PaymentCompleted {
        user_id: "u-1".into(),
        payment_id: "p-1".into(),
        amount: 1200,
    };
    outbox
        .record(
            &MessageEnvelope::new("payments", "payment.completed", event),
            &PublishOptions::new().with_dedupe_key("p-1"),
            Some(&tx),
        )
        .await?;
    tx.commit()?;

    let metrics = Arc::new(OutboxMetrics::new()?);
    let dispatcher = OutboxDispatcher::new(store.clone(), bus.clone(), metrics.clone())
        .with_worker_id("demo-dispatcher")
        .spawn(Duration::from_millis(20));

    // Request/response on the same bus.
    let reply = bus
        .publish_and_wait(
            "payments",
            "payment.completed",
            PaymentCompleted {
                user_id: "u-2".into(),
                payment_id: "p-2".into(),
                amount: 300,
            },
            PublishOptions::new(),
        )
        .await?;
    info!(job_id = %reply.job_id, result = %reply.result, "handshake reply");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let dispatched = dispatcher.stop().await;
    let consumed = worker.stop().await;

    info!(
        sent = dispatched.totals.sent,
        jobs_completed = consumed.jobs_completed,
        "flow finished"
    );
    match serde_json::to_string_pretty(&metrics.snapshot()) {
        Ok(snapshot) => println!("{}", snapshot),
        Err(err) => tracing::warn!(error = %err, "failed to render metrics"),
    }
    print!("{}", metrics.render()?);
    Ok(())
}
