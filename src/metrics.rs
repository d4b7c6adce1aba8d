//! Outbox dispatch metrics on a prometheus registry.
//!
//! Counters and the latency histogram register on the [`Registry`] handed
//! to [`OutboxMetrics::with_registry`], so an application can expose them
//! next to its own metrics. Recording never fails; only registration and
//! rendering return errors. Values start from zero on restart.

use std::time::Duration;

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::iso_timestamp;

const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics registry error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

pub struct OutboxMetrics {
    registry: Registry,
    claimed: IntCounter,
    sent: IntCounter,
    retry: IntCounter,
    dead: IntCounter,
    dispatch_latency: Histogram,
}

/// Counter values at one instant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxCounters {
    pub claimed: u64,
    pub sent: u64,
    pub retry: u64,
    pub dead: u64,
    /// Average over successful dispatches only.
    pub dispatch_latency_avg_ms: f64,
    pub dispatch_count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub outbox: OutboxCounters,
    pub timestamp: String,
}

impl OutboxMetrics {
    /// Metrics on a private registry.
    pub fn new() -> Result<Self, MetricsError> {
        Self::with_registry(Registry::new())
    }

    /// Register the outbox metrics on `registry`. Fails if they are already
    /// registered there.
    pub fn with_registry(registry: Registry) -> Result<Self, MetricsError> {
        let claimed = IntCounter::new("outbox_claimed_total", "Outbox rows claimed by dispatchers")?;
        let sent = IntCounter::new("outbox_sent_total", "Outbox rows published to the queue")?;
        let retry = IntCounter::new("outbox_retry_total", "Outbox rows scheduled for retry")?;
        let dead = IntCounter::new("outbox_dead_total", "Outbox rows dead-lettered")?;
        let dispatch_latency = Histogram::with_opts(
            HistogramOpts::new(
                "outbox_dispatch_duration_seconds",
                "Time to publish and settle a successfully dispatched row",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(claimed.clone()))?;
        registry.register(Box::new(sent.clone()))?;
        registry.register(Box::new(retry.clone()))?;
        registry.register(Box::new(dead.clone()))?;
        registry.register(Box::new(dispatch_latency.clone()))?;

        Ok(Self {
            registry,
            claimed,
            sent,
            retry,
            dead,
            dispatch_latency,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_claimed(&self, count: u64) {
        self.claimed.inc_by(count);
    }

    /// Count a successful dispatch and observe its latency.
    pub fn record_sent(&self, latency: Duration) {
        self.sent.inc();
        self.dispatch_latency.observe(latency.as_secs_f64());
    }

    pub fn record_retry(&self) {
        self.retry.inc();
    }

    pub fn record_dead(&self) {
        self.dead.inc();
    }

    pub fn counters(&self) -> OutboxCounters {
        let dispatch_count = self.dispatch_latency.get_sample_count();
        let dispatch_latency_avg_ms = if dispatch_count == 0 {
            0.0
        } else {
            self.dispatch_latency.get_sample_sum() / dispatch_count as f64 * 1000.0
        };

        OutboxCounters {
            claimed: self.claimed.get(),
            sent: self.sent.get(),
            retry: self.retry.get(),
            dead: self.dead.get(),
            dispatch_latency_avg_ms,
            dispatch_count,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            outbox: self.counters(),
            timestamp: iso_timestamp(),
        }
    }

    /// Everything on the registry in the prometheus text format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| MetricsError::Prometheus(prometheus::Error::Msg(e.to_string())))
    }
}
