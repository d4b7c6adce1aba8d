use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::CacheError;

/// Key-value store with per-entry TTL.
///
/// Used for dedupe markers and handshake results. Readers and writers never
/// coordinate beyond the key itself; stale entries disappear when their TTL
/// runs out.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Read a live value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Write a value that expires after `ttl`. Overwrites any previous value.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    /// Remove a value. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[async_trait]
impl<C: Cache + ?Sized> Cache for std::sync::Arc<C> {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        (**self).delete(key).await
    }
}
