//! Outbox store double that counts default-client lookups.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use outbox_bus::{InMemoryOutboxStore, OutboxStore, OutboxWriter};

#[derive(Clone, Default)]
pub struct CountingStore {
    inner: InMemoryOutboxStore,
    default_client_calls: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryOutboxStore {
        &self.inner
    }

    pub fn default_client_calls(&self) -> usize {
        self.default_client_calls.load(Ordering::SeqCst)
    }
}

impl OutboxStore for CountingStore {
    fn default_client(&self) -> Arc<dyn OutboxWriter> {
        self.default_client_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.default_client()
    }
}
