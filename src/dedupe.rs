//! Consumer-side guard against processing the same logical event twice.
//!
//! Upstream delivery is at-least-once. A consumer derives a key for the event
//! (usually with [`build_event_dedupe_key`](crate::keys::build_event_dedupe_key))
//! and asks the guard whether this is the first delivery before doing any
//! side effects.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::cache::{Cache, CacheError};

pub const DEDUPE_KEY_PREFIX: &str = "dedupe:";

pub struct DedupeGuard<C> {
    cache: C,
    ttl: Duration,
}

impl<C: Cache> DedupeGuard<C> {
    /// Markers live for `ttl`; a redelivery after that is processed again.
    pub fn new(cache: C, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    fn marker_key(key: &str) -> String {
        format!("{}{}", DEDUPE_KEY_PREFIX, key)
    }

    /// `true` the first time `key` is seen within the TTL window.
    ///
    /// The check and the marker write are two cache calls, so two consumers
    /// racing on the same key can both see `true`. Pair with a unique
    /// constraint where a double side effect is unacceptable.
    pub async fn first_delivery(&self, key: &str) -> Result<bool, CacheError> {
        let marker = Self::marker_key(key);
        if self.cache.get(&marker).await?.is_some() {
            debug!(dedupe_key = %key, "duplicate delivery skipped");
            return Ok(false);
        }
        self.cache.set(&marker, Value::Bool(true), self.ttl).await?;
        Ok(true)
    }

    /// Drop the marker so a failed handler can process the event again.
    pub async fn forget(&self, key: &str) -> Result<(), CacheError> {
        self.cache.delete(&Self::marker_key(key)).await
    }
}
