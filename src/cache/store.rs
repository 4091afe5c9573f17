//! Cache storage.
//!
//! [`Store`] is the persistence seam: the scheduler, coordinator and tag index
//! only ever talk to this trait, so memory, disk and networked backends are
//! interchangeable. Every backend must honour compare-and-swap on generation.

use std::num::NonZeroUsize;
use std::sync::RwLock;

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use tracing::debug;

use super::entry::{CacheEntry, Generation};
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};
use super::metrics::METRIC_STORE_EVICT_TOTAL;

const SOURCE: &str = "cache::store";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("cache store unavailable: {message}")]
    Unavailable { message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// The caller's observed generation was not the latest; nothing was written.
    Conflict { current: Option<Generation> },
}

impl PutOutcome {
    pub fn is_stored(self) -> bool {
        matches!(self, PutOutcome::Stored)
    }
}

/// Pluggable key-value persistence for cache entries.
#[async_trait]
pub trait Store: Send + Sync {
    /// Absent keys are `Ok(None)`, never an error.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError>;

    /// Write `entry` if the stored generation still equals `observed`
    /// (`None` = the caller saw no entry) and `entry.generation` is newer.
    async fn put(
        &self,
        entry: CacheEntry,
        observed: Option<Generation>,
    ) -> Result<PutOutcome, StoreError>;

    /// Returns whether an entry was removed.
    async fn delete(&self, key: &CacheKey) -> Result<bool, StoreError>;

    /// Keys starting with `prefix`, sorted. An empty prefix lists everything.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<CacheKey>, StoreError>;
}

/// Shared CAS rule so every backend decides conflicts the same way.
pub(crate) fn check_generation(
    current: Option<Generation>,
    observed: Option<Generation>,
    incoming: Generation,
) -> PutOutcome {
    if current != observed || incoming <= observed.unwrap_or(0) {
        PutOutcome::Conflict { current }
    } else {
        PutOutcome::Stored
    }
}

/// In-process store with LRU eviction once `capacity` keys are held.
pub struct MemoryStore {
    entries: RwLock<LruCache<CacheKey, CacheEntry>>,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            entries: RwLock::new(LruCache::unbounded()),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "memory.len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        Ok(rw_write(&self.entries, SOURCE, "memory.get").get(key).cloned())
    }

    async fn put(
        &self,
        entry: CacheEntry,
        observed: Option<Generation>,
    ) -> Result<PutOutcome, StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "memory.put");
        let current = entries.peek(&entry.key).map(|existing| existing.generation);
        let outcome = check_generation(current, observed, entry.generation);
        if !outcome.is_stored() {
            return Ok(outcome);
        }

        let key = entry.key.clone();
        if let Some((evicted, _)) = entries.push(key.clone(), entry)
            && evicted != key
        {
            debug!(key = %evicted, "memory store evicted entry at capacity");
            counter!(METRIC_STORE_EVICT_TOTAL).increment(1);
        }
        Ok(PutOutcome::Stored)
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        Ok(rw_write(&self.entries, SOURCE, "memory.delete")
            .pop(key)
            .is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<CacheKey>, StoreError> {
        let entries = rw_read(&self.entries, SOURCE, "memory.list_keys");
        let mut keys: Vec<CacheKey> = entries
            .iter()
            .map(|(key, _)| key)
            .filter(|key| key.as_str().starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
