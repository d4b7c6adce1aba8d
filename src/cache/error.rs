use thiserror::Error;

/// Error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The in-process store was poisoned by a panicking writer.
    #[error("cache lock poisoned during {0}")]
    LockPoisoned(&'static str),
    /// The value could not be converted to or from JSON.
    #[error("cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The backing store (Redis, memcached, ...) reported an error.
    #[error("cache backend error: {0}")]
    Backend(String),
}
