//! Waiting side of the publish-and-wait handshake.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::BusError;
use crate::cache::Cache;
use crate::keys::build_handshake_key;

/// Outcome of a completed handshake.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeReply {
    /// Id returned by the queue for the published job.
    pub job_id: String,
    /// Exactly what the consumer passed to `mark_done`.
    pub result: Value,
    pub correlation_id: String,
}

/// Polls the handshake slot for one correlation id.
///
/// The poll interval and the deadline are both timers owned by the future
/// returned from [`wait`](Self::wait), so they are dropped when it resolves,
/// times out, or is cancelled.
pub(crate) struct HandshakeWaiter<'a, C: ?Sized> {
    cache: &'a C,
    correlation_id: &'a str,
    timeout: Duration,
    poll_interval: Duration,
}

impl<'a, C: Cache + ?Sized> HandshakeWaiter<'a, C> {
    pub(crate) fn new(
        cache: &'a C,
        correlation_id: &'a str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            cache,
            correlation_id,
            timeout,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub(crate) async fn wait(self) -> Result<Value, BusError> {
        let key = build_handshake_key(self.correlation_id);
        let started = Instant::now();

        let poll = async {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut polls = 0u32;
            loop {
                ticker.tick().await;
                polls += 1;
                if let Some(value) = self.cache.get(&key).await? {
                    debug!(correlation_id = %self.correlation_id, polls, "handshake result found");
                    return Ok::<_, BusError>(value);
                }
            }
        };

        match tokio::time::timeout(self.timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(BusError::HandshakeTimeout {
                correlation_id: self.correlation_id.to_string(),
                elapsed: started.elapsed(),
            }),
        }
    }
}

/// Counts a handshake as waiting for as long as the guard lives.
pub(crate) struct WaitingGuard(Arc<AtomicUsize>);

impl WaitingGuard {
    pub(crate) fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn returns_value_once_written() {
        let cache = InMemoryCache::new();
        let writer = cache.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(25)).await;
            writer
                .set("handshake:c1", json!({"status": "ok"}), Duration::from_secs(5))
                .await
                .unwrap();
        });

        let value = HandshakeWaiter::new(&cache, "c1", Duration::from_secs(1), Duration::from_millis(10))
            .wait()
            .await
            .unwrap();
        assert_eq!(value, json!({"status": "ok"}));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_within_one_interval() {
        let cache = InMemoryCache::new();
        let started = Instant::now();

        let err = HandshakeWaiter::new(&cache, "c2", Duration::from_millis(100), Duration::from_millis(10))
            .wait()
            .await
            .unwrap_err();

        let waited = started.elapsed();
        assert!(err.is_timeout());
        assert_eq!(err.correlation_id(), Some("c2"));
        assert!(waited >= Duration::from_millis(100));
        assert!(waited <= Duration::from_millis(110));
    }

    #[test]
    fn guard_counts_while_alive() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let _a = WaitingGuard::enter(&counter);
            let _b = WaitingGuard::enter(&counter);
            assert_eq!(counter.load(Ordering::SeqCst), 2);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
