//! Outbox-backed message bus.
//!
//! - [`MessageBus`]: fire-and-forget publishing to a job queue, plus a
//!   request/response handshake that polls a cache for the consumer's result.
//! - [`OutboxService`]: records envelopes inside the caller's transaction so
//!   events commit with business state; [`OutboxDispatcher`] drains them.
//! - [`DedupeGuard`] and the [`keys`] builders for at-least-once consumers.
//! - [`OutboxMetrics`]: dispatch counters and latency on a prometheus registry.
//!
//! The job queue, the cache and the outbox store are collaborators behind
//! traits; in-memory implementations of each ship with the crate.

pub mod bus;
pub mod cache;
mod clock;
pub mod dedupe;
pub mod envelope;
mod error;
pub mod keys;
pub mod metrics;
pub mod outbox;
pub mod queue;
pub mod settings;

pub use bus::{BusError, Delivery, HandshakeReply, MessageBus};
pub use cache::{Cache, CacheError, InMemoryCache};
pub use dedupe::DedupeGuard;
pub use envelope::{EnvelopeMeta, MessageEnvelope, PublishOptions};
pub use error::{Error, Result};
pub use keys::{build_event_dedupe_key, build_handshake_key, build_job_id};
pub use metrics::{MetricsError, MetricsSnapshot, OutboxCounters, OutboxMetrics};
pub use outbox::{
    DispatchResult, DispatcherHandle, DispatcherStats, InMemoryOutboxStore, InMemoryTransaction,
    NewOutboxRow, OutboxClaims, OutboxDispatcher, OutboxError, OutboxRow, OutboxService,
    OutboxStatus, OutboxStore, OutboxWriter, Transition,
};
pub use queue::{
    Backoff, BackoffKind, HandlerError, InMemoryJobQueue, Job, JobHandle, JobHandler, JobOptions,
    JobQueue, JobState, JobWorker, QueueError, WorkerStats,
};
pub use settings::{ConfigError, DeliveryMode, MessageBusConfig, Settings};
