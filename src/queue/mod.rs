//! Job queue collaborator.
//!
//! ```text
//! MessageBus::publish ──add(name, payload, JobOptions)──▶ JobQueue
//!                                                            │
//!                                   JobWorker ◀──take(name)──┘
//!                                       │
//!                                       ▼
//!                                  JobHandler::handle
//! ```
//!
//! The bus only depends on [`JobQueue::add`]. `InMemoryJobQueue` and
//! `JobWorker` give a complete single-process queue with job-id coalescing,
//! priorities, delays and exponential backoff.

mod error;
mod in_memory;
mod job;
mod queue;
mod worker;

pub use error::QueueError;
pub use in_memory::InMemoryJobQueue;
pub use job::{Backoff, BackoffKind, Job, JobHandle, JobOptions, JobState};
pub use queue::JobQueue;
pub use worker::{HandlerError, JobHandler, JobWorker, WorkerStats};
