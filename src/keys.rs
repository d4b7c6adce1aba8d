//! Deterministic key derivation shared by producers and consumers.
//!
//! Everything here is pure: the same inputs always give the same key, so two
//! processes can agree on a cache slot or a queue job id with nothing more
//! than the ids they already hold.

/// Prefix for handshake result slots in the cache.
pub const HANDSHAKE_KEY_PREFIX: &str = "handshake:";

/// Placeholder used when an event carries no source id.
pub const NO_SOURCE: &str = "no-source";

/// Key consumers use to recognise a re-delivered logical event.
///
/// The timestamp is part of the key, so two submissions at different instants
/// are distinct events. Callers that need retries to collide must pass a
/// stable `dedupe_key` to `publish`/`record` instead.
pub fn build_event_dedupe_key(user_id: &str, timestamp: &str, source_id: Option<&str>) -> String {
    format!("{}-{}-{}", user_id, timestamp, source_id.unwrap_or(NO_SOURCE))
}

/// Cache key under which the result of a handshake is stored.
pub fn build_handshake_key(correlation_id: &str) -> String {
    format!("{}{}", HANDSHAKE_KEY_PREFIX, correlation_id)
}

/// Job id requested from the queue for an explicitly deduplicated publish.
pub fn build_job_id(topic: &str, dedupe_key: &str) -> String {
    format!("{}:{}", topic, dedupe_key)
}
