//! Message bus - publishing and request/response handshakes
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      MessageBus (per process)                │
//! │  publish() / publish_and_wait() / mark_done() / send()       │
//! └──────────────────────────────────────────────────────────────┘
//!              │                                   │
//!              ▼                                   ▼
//! ┌─────────────────────────┐        ┌─────────────────────────┐
//! │ JobQueue::add           │        │ Cache get/set (TTL)     │
//! │ jobId = topic:dedupeKey │        │ handshake:{correlation} │
//! └─────────────────────────┘        └─────────────────────────┘
//! ```
//!
//! ## Handshake
//!
//! 1. Caller: `publish_and_wait` enqueues the envelope with a correlation id
//!    in its meta, then polls `handshake:{correlation_id}`.
//! 2. Consumer: processes the job and calls `mark_done(correlation_id, result, ttl)`.
//! 3. Caller: sees the value and returns it unchanged, or gives up with
//!    `BusError::HandshakeTimeout` after the timeout. The job is not cancelled.

mod error;
mod handshake;
mod message_bus;

pub use error::BusError;
pub use handshake::HandshakeReply;
pub use message_bus::{Delivery, MessageBus};
