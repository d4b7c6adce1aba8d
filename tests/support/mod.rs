//! Shared doubles for the integration suites.

#![allow(dead_code)]

pub mod queues;
pub mod store;

pub use queues::{FailingQueue, FlakyQueue, RecordedAdd, RecordingQueue};
pub use store::CountingStore;

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
