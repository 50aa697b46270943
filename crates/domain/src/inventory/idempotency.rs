//! Outcome cache for idempotent commands.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_store::Version;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::{InventoryError, InventoryEvent};

/// What a command did the first time its idempotency key was seen.
///
/// Only decisions are recorded. Infrastructure failures are not, so a
/// redelivery after one runs the command again.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedOutcome {
    Accepted {
        events: Vec<InventoryEvent>,
        version: Version,
        recorded_at: DateTime<Utc>,
    },
    Rejected {
        error: InventoryError,
        recorded_at: DateTime<Utc>,
    },
}

impl RecordedOutcome {
    pub fn accepted(events: Vec<InventoryEvent>, version: Version) -> Self {
        RecordedOutcome::Accepted {
            events,
            version,
            recorded_at: Utc::now(),
        }
    }

    pub fn rejected(error: InventoryError) -> Self {
        RecordedOutcome::Rejected {
            error,
            recorded_at: Utc::now(),
        }
    }
}

/// Storage for recorded outcomes, keyed by idempotency key.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<RecordedOutcome>;

    /// Records `outcome` unless the key already has one; the first outcome wins.
    async fn record(&self, key: &str, outcome: RecordedOutcome);
}

#[derive(Debug, Default)]
struct OutcomeCache {
    entries: HashMap<String, RecordedOutcome>,
    /// Insertion order, oldest first, for eviction.
    order: VecDeque<String>,
}

/// Bounded in-process outcome cache; the oldest key is evicted first.
#[derive(Debug, Clone)]
pub struct InMemoryIdempotencyStore {
    cache: Arc<RwLock<OutcomeCache>>,
    capacity: usize,
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::with_capacity(10_000)
    }
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Option<RecordedOutcome> {
        self.cache.read().await.entries.get(key).cloned()
    }

    async fn record(&self, key: &str, outcome: RecordedOutcome) {
        let mut cache = self.cache.write().await;
        if cache.entries.contains_key(key) {
            return;
        }

        while cache.order.len() >= self.capacity {
            if let Some(oldest) = cache.order.pop_front() {
                cache.entries.remove(&oldest);
            }
        }
        cache.order.push_back(key.to_string());
        cache.entries.insert(key.to_string(), outcome);
    }
}

/// One async lock per idempotency key in flight.
///
/// Commands sharing a key run one at a time, so the second sees the
/// outcome the first recorded. Entries are dropped once no holder remains.
#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub(crate) async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    pub(crate) async fn release(&self, key: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut locks = self.locks.lock().await;
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    async fn in_flight(&self) -> usize {
        self.locks.lock().await.len()
    }
}
