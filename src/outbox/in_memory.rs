//! In-memory outbox store with transactions.
//!
//! Stands in for a relational table in tests and single-process setups:
//! - `dedupe_key` is unique across committed and staged rows
//! - a transaction stages outbox rows and business entities together and
//!   applies both on commit, or neither
//! - status changes are a compare-and-swap on the row version
//! - a claimed row can be claimed again once its lease has run out

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{
    NewOutboxRow, OutboxClaims, OutboxError, OutboxRow, OutboxStatus, OutboxStore, OutboxWriter,
    Transition,
};

#[derive(Default)]
struct StoreState {
    rows: BTreeMap<u64, OutboxRow>,
    entities: HashMap<String, Value>,
}

impl StoreState {
    fn has_dedupe_key(&self, key: &str) -> bool {
        self.rows
            .values()
            .any(|row| row.dedupe_key.as_deref() == Some(key))
    }
}

/// Shared in-memory outbox table. Clones see the same rows.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    state: Arc<RwLock<StoreState>>,
    seq: Arc<AtomicU64>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transaction against this store.
    pub fn begin(&self) -> InMemoryTransaction {
        InMemoryTransaction {
            store: self.clone(),
            staged: Mutex::new(Staged::default()),
        }
    }

    fn next_id(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn row(&self, id: u64) -> Result<Option<OutboxRow>, OutboxError> {
        let state = self
            .state
            .read()
            .map_err(|_| OutboxError::LockPoisoned("read"))?;
        Ok(state.rows.get(&id).cloned())
    }

    pub fn rows(&self) -> Result<Vec<OutboxRow>, OutboxError> {
        let state = self
            .state
            .read()
            .map_err(|_| OutboxError::LockPoisoned("read"))?;
        Ok(state.rows.values().cloned().collect())
    }

    pub fn rows_with_status(&self, status: OutboxStatus) -> Result<Vec<OutboxRow>, OutboxError> {
        Ok(self
            .rows()?
            .into_iter()
            .filter(|row| row.status == status)
            .collect())
    }

    /// Business entity committed alongside outbox rows.
    pub fn entity(&self, key: &str) -> Result<Option<Value>, OutboxError> {
        let state = self
            .state
            .read()
            .map_err(|_| OutboxError::LockPoisoned("read"))?;
        Ok(state.entities.get(key).cloned())
    }
}

#[async_trait]
impl OutboxWriter for InMemoryOutboxStore {
    async fn insert(&self, row: NewOutboxRow) -> Result<OutboxRow, OutboxError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| OutboxError::LockPoisoned("insert"))?;

        if let Some(key) = &row.dedupe_key {
            if state.has_dedupe_key(key) {
                return Err(OutboxError::DuplicateRecord {
                    dedupe_key: key.clone(),
                });
            }
        }

        let row = OutboxRow::from_new(self.next_id(), row, Utc::now());
        state.rows.insert(row.id, row.clone());
        Ok(row)
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn default_client(&self) -> Arc<dyn OutboxWriter> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl OutboxClaims for InMemoryOutboxStore {
    async fn claimable(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxRow>, OutboxError> {
        let state = self
            .state
            .read()
            .map_err(|_| OutboxError::LockPoisoned("claimable"))?;

        let mut rows: Vec<OutboxRow> = state
            .rows
            .values()
            .filter(|row| row.is_claimable(now))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.priority
                .unwrap_or(0)
                .cmp(&a.priority.unwrap_or(0))
                .then(a.id.cmp(&b.id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn transition(
        &self,
        id: u64,
        expected_version: u64,
        change: Transition,
        now: DateTime<Utc>,
    ) -> Result<OutboxRow, OutboxError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| OutboxError::LockPoisoned("transition"))?;
        let row = state.rows.get_mut(&id).ok_or(OutboxError::NotFound(id))?;

        if row.version != expected_version {
            return Err(OutboxError::VersionConflict {
                id,
                expected: expected_version,
                actual: row.version,
            });
        }

        let target = change.target();
        let lease_held = matches!(change, Transition::Claim { .. }) && !row.is_claimable(now);
        if lease_held || !row.status.can_transition_to(target) {
            return Err(OutboxError::InvalidTransition {
                id,
                from: row.status,
                to: target,
            });
        }

        row.apply(change, now);
        Ok(row.clone())
    }
}

#[derive(Default)]
struct Staged {
    rows: Vec<OutboxRow>,
    entities: Vec<(String, Value)>,
}

/// Transaction over an [`InMemoryOutboxStore`].
///
/// Nothing is visible to other readers until [`commit`](Self::commit).
/// Dropping the transaction without committing discards everything staged.
pub struct InMemoryTransaction {
    store: InMemoryOutboxStore,
    staged: Mutex<Staged>,
}

impl InMemoryTransaction {
    /// Stage a business-state write to commit with the outbox rows.
    pub fn put_entity(&self, key: impl Into<String>, value: Value) -> Result<(), OutboxError> {
        let mut staged = self
            .staged
            .lock()
            .map_err(|_| OutboxError::LockPoisoned("stage entity"))?;
        staged.entities.push((key.into(), value));
        Ok(())
    }

    pub fn staged_rows(&self) -> usize {
        self.staged.lock().map(|s| s.rows.len()).unwrap_or(0)
    }

    /// Apply every staged write atomically.
    ///
    /// Fails without applying anything if a staged dedupe key was committed
    /// by someone else after it was staged.
    pub fn commit(self) -> Result<Vec<OutboxRow>, OutboxError> {
        let staged = self
            .staged
            .into_inner()
            .map_err(|_| OutboxError::LockPoisoned("commit"))?;
        let mut state = self
            .store
            .state
            .write()
            .map_err(|_| OutboxError::LockPoisoned("commit"))?;

        for row in &staged.rows {
            if let Some(key) = &row.dedupe_key {
                if state.has_dedupe_key(key) {
                    return Err(OutboxError::DuplicateRecord {
                        dedupe_key: key.clone(),
                    });
                }
            }
        }

        for (key, value) in staged.entities {
            state.entities.insert(key, value);
        }
        for row in &staged.rows {
            state.rows.insert(row.id, row.clone());
        }
        Ok(staged.rows)
    }

    /// Discard everything staged.
    pub fn rollback(self) {}
}

#[async_trait]
impl OutboxWriter for InMemoryTransaction {
    async fn insert(&self, row: NewOutboxRow) -> Result<OutboxRow, OutboxError> {
        let mut staged = self
            .staged
            .lock()
            .map_err(|_| OutboxError::LockPoisoned("stage row"))?;

        if let Some(key) = &row.dedupe_key {
            let committed = self
                .store
                .state
                .read()
                .map_err(|_| OutboxError::LockPoisoned("read"))?
                .has_dedupe_key(key);
            let staged_dup = staged
                .rows
                .iter()
                .any(|r| r.dedupe_key.as_deref() == Some(key.as_str()));
            if committed || staged_dup {
                return Err(OutboxError::DuplicateRecord {
                    dedupe_key: key.clone(),
                });
            }
        }

        let row = OutboxRow::from_new(self.store.next_id(), row, Utc::now());
        staged.rows.push(row.clone());
        Ok(row)
    }
}
