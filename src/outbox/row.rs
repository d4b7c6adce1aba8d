use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{MessageEnvelope, PublishOptions};

/// Outbox row lifecycle.
///
/// ```text
/// PENDING ──▶ CLAIMED ──▶ SENT
///                │ ▲
///                ▼ │
///              RETRY ──▶ DEAD
/// ```
///
/// `CLAIMED` may also go straight to `DEAD` when the last attempt fails, and
/// back to `CLAIMED` when another dispatcher takes over an expired lease.
/// `RETRY` goes to `DEAD` without a claim once its attempts are used up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Claimed,
    Sent,
    Retry,
    Dead,
}

impl OutboxStatus {
    pub fn can_transition_to(self, next: OutboxStatus) -> bool {
        use OutboxStatus::*;
        matches!(
            (self, next),
            (Pending, Claimed)
                | (Retry, Claimed)
                | (Claimed, Claimed)
                | (Claimed, Sent)
                | (Claimed, Retry)
                | (Claimed, Dead)
                | (Retry, Dead)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OutboxStatus::Sent | OutboxStatus::Dead)
    }

    /// Waiting for a dispatcher. Claimed rows become claimable again only
    /// once their lease runs out, see [`OutboxRow::is_claimable`].
    pub fn is_claimable(self) -> bool {
        matches!(self, OutboxStatus::Pending | OutboxStatus::Retry)
    }
}

/// A status change requested by a dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    Claim {
        worker_id: String,
        /// End of the claim lease.
        until: DateTime<Utc>,
    },
    Sent,
    Retry {
        error: String,
        retry_at: Option<DateTime<Utc>>,
    },
    Dead { error: String },
}

impl Transition {
    pub fn target(&self) -> OutboxStatus {
        match self {
            Transition::Claim { .. } => OutboxStatus::Claimed,
            Transition::Sent => OutboxStatus::Sent,
            Transition::Retry { .. } => OutboxStatus::Retry,
            Transition::Dead { .. } => OutboxStatus::Dead,
        }
    }
}

/// Row contents before the store assigns an id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxRow {
    pub topic: String,
    pub event_type: String,
    pub payload: Value,
    /// Timestamp of the envelope the row was recorded from.
    pub occurred_at: String,
    pub dedupe_key: Option<String>,
    pub correlation_id: Option<String>,
    pub partition_key: Option<String>,
    pub priority: Option<i32>,
    /// Delivery attempts requested for the queued job.
    pub max_attempts: Option<u32>,
    pub deliver_at: Option<DateTime<Utc>>,
}

/// Persisted outbox record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboxRow {
    pub id: u64,
    pub topic: String,
    pub event_type: String,
    pub payload: Value,
    pub occurred_at: String,
    pub dedupe_key: Option<String>,
    pub correlation_id: Option<String>,
    pub partition_key: Option<String>,
    pub priority: Option<i32>,
    /// Passed to the queue as the job's `attempts`. The dispatcher's own
    /// claim budget is separate.
    pub max_attempts: Option<u32>,
    pub deliver_at: Option<DateTime<Utc>>,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of claims so far.
    pub attempts: u32,
    /// Bumped on every transition; claims compare-and-swap on it.
    pub version: u64,
    pub last_error: Option<String>,
    pub claimed_by: Option<String>,
    /// Lease end of the current claim. Past it the row may be claimed again.
    pub claimed_until: Option<DateTime<Utc>>,
}

impl OutboxRow {
    pub fn from_new(id: u64, new: NewOutboxRow, now: DateTime<Utc>) -> Self {
        Self {
            id,
            topic: new.topic,
            event_type: new.event_type,
            payload: new.payload,
            occurred_at: new.occurred_at,
            dedupe_key: new.dedupe_key,
            correlation_id: new.correlation_id,
            partition_key: new.partition_key,
            priority: new.priority,
            max_attempts: new.max_attempts,
            deliver_at: new.deliver_at,
            status: OutboxStatus::Pending,
            created_at: now,
            updated_at: now,
            attempts: 0,
            version: 0,
            last_error: None,
            claimed_by: None,
            claimed_until: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.deliver_at.map_or(true, |at| at <= now)
    }

    /// Claimed, but the claimant's lease has run out.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Claimed && self.claimed_until.map_or(true, |until| until <= now)
    }

    /// A dispatcher may claim this row at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        (self.status.is_claimable() && self.is_due(now)) || self.lease_expired(now)
    }

    /// Apply a transition that the store has already validated.
    pub fn apply(&mut self, change: Transition, now: DateTime<Utc>) {
        self.status = change.target();
        match change {
            Transition::Claim { worker_id, until } => {
                self.attempts += 1;
                self.claimed_by = Some(worker_id);
                self.claimed_until = Some(until);
                return self.touch(now);
            }
            Transition::Sent => {
                self.last_error = None;
            }
            Transition::Retry { error, retry_at } => {
                self.last_error = Some(error);
                if retry_at.is_some() {
                    self.deliver_at = retry_at;
                }
            }
            Transition::Dead { error } => {
                self.last_error = Some(error);
            }
        }
        self.claimed_by = None;
        self.claimed_until = None;
        self.touch(now);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }

    /// The envelope this row was recorded from, with its original timestamp.
    pub fn envelope(&self) -> MessageEnvelope<Value> {
        let envelope = MessageEnvelope::at(
            &self.topic,
            &self.event_type,
            self.payload.clone(),
            &self.occurred_at,
        );
        match &self.correlation_id {
            Some(correlation_id) => envelope.with_correlation_id(correlation_id.clone()),
            None => envelope,
        }
    }

    /// Publish options carried by the row; any remaining delay is kept.
    pub fn publish_options(&self, now: DateTime<Utc>) -> PublishOptions {
        let delay_ms = self
            .deliver_at
            .map(|at| (at - now).num_milliseconds())
            .filter(|ms| *ms > 0)
            .map(|ms| ms as u64);

        PublishOptions {
            dedupe_key: self.dedupe_key.clone(),
            partition_key: self.partition_key.clone(),
            priority: self.priority,
            attempts: self.max_attempts,
            delay_ms,
            correlation_id: self.correlation_id.clone(),
            ..PublishOptions::default()
        }
    }
}
