//! Transactional outbox.
//!
//! ## Flow
//!
//! ```text
//! business tx ──┬── business writes
//!               └── OutboxService::record(envelope, options, Some(tx))
//!                          │ commit
//!                          ▼
//!                   outbox table (PENDING)
//!                          │ OutboxClaims::claim (CAS on version)
//!                          ▼
//!                   OutboxDispatcher ── MessageBus::publish_envelope ──▶ JobQueue
//!                          │
//!                          ▼
//!                 SENT | RETRY (backoff) | DEAD
//! ```
//!
//! The row commits atomically with the business state, so an event is
//! published if and only if the business change happened. Delivery to the
//! queue is at-least-once; consumers deduplicate on the dedupe key.
//!
//! A claim holds a lease (`claimed_until`). Rows left `CLAIMED` by a
//! dispatcher that died are claimable again once the lease runs out.

mod dispatcher;
mod error;
mod in_memory;
mod row;
mod service;
mod store;

pub use dispatcher::{DispatchResult, DispatcherHandle, DispatcherStats, OutboxDispatcher};
pub use error::OutboxError;
pub use in_memory::{InMemoryOutboxStore, InMemoryTransaction};
pub use row::{NewOutboxRow, OutboxRow, OutboxStatus, Transition};
pub use service::OutboxService;
pub use store::{OutboxClaims, OutboxStore, OutboxWriter};
