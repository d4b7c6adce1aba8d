use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use super::{Cache, CacheError};
use crate::clock::instant_after;

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// In-process TTL cache.
///
/// Clones share the same storage, so a producer and a consumer in one
/// process can hand results to each other through it. Expiry is measured on
/// the tokio clock, which lets paused-time tests drive TTLs deterministically.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|entries| entries.values().filter(|e| e.expires_at > now).count())
            .unwrap_or(0)
    }

    /// Number of entries held, expired or not.
    pub fn stored(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CacheError::LockPoisoned("purge"))?;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        Ok(before - entries.len())
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let now = Instant::now();
        {
            let entries = self
                .entries
                .read()
                .map_err(|_| CacheError::LockPoisoned("get"))?;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // expired: drop it unless a writer refreshed it in between
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CacheError::LockPoisoned("get"))?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Writes also sweep every expired entry, so the map stays bounded by
    /// the number of live keys.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CacheError::LockPoisoned("set"))?;
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: instant_after(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CacheError::LockPoisoned("delete"))?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get() {
        let cache = InMemoryCache::new();
        cache
            .set("k", json!({"status": "ok"}), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"status": "ok"})));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = InMemoryCache::new();
        cache.set("k", json!(1), Duration::from_secs(2)).await.unwrap();

        tokio::time::advance(Duration::from_millis(1999)).await;
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(1)));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.is_empty());
        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_ttl_never_expires() {
        let cache = InMemoryCache::new();
        cache.set("k", json!(1), Duration::MAX).await.unwrap();
        cache
            .set("secs", json!(2), Duration::from_secs(u64::MAX))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(86_400 * 365)).await;
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(1)));
        assert_eq!(cache.get("secs").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_dropped_without_purge() {
        let cache = InMemoryCache::new();
        cache.set("a", json!(1), Duration::from_secs(1)).await.unwrap();
        cache.set("b", json!(2), Duration::from_secs(1)).await.unwrap();
        cache.set("c", json!(3), Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.stored(), 2);

        cache.set("d", json!(4), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.stored(), 1);
        assert_eq!(cache.purge_expired().unwrap(), 0);
    }

    #[tokio::test]
    async fn last_write_wins() {
        let cache = InMemoryCache::new();
        cache.set("k", json!("first"), Duration::from_secs(5)).await.unwrap();
        cache.set("k", json!("second"), Duration::from_secs(5)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!("second")));
    }

    #[tokio::test]
    async fn clones_share_storage() {
        let writer = InMemoryCache::new();
        let reader = writer.clone();
        writer.set("k", json!(true), Duration::from_secs(5)).await.unwrap();
        assert_eq!(reader.get("k").await.unwrap(), Some(json!(true)));

        reader.delete("k").await.unwrap();
        assert_eq!(writer.get("k").await.unwrap(), None);
        assert_eq!(writer.len(), 0);
    }
}
