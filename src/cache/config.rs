//! Cache configuration.
//!
//! Read from the `[cache]` table of `render-cache.toml`.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::disk::FileSystemStore;
use super::policy::RevalidationPolicy;
use super::store::{MemoryStore, Store, StoreError};

const DEFAULT_RENDER_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MEMORY_CAPACITY: usize = 1_000;
const DEFAULT_DIRECTORY: &str = ".render-cache";

/// Which [`Store`] implementation backs the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Disk,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: StoreBackend,
    /// Stale-serving window past `revalidate_after`. Unset means "same as revalidate_after".
    pub stale_grace_seconds: Option<u64>,
    /// Deadline for a single render call.
    pub render_timeout_ms: u64,
    /// Maximum entries held by the memory backend.
    pub memory_capacity: usize,
    /// Root directory of the disk backend.
    pub directory: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            stale_grace_seconds: None,
            render_timeout_ms: DEFAULT_RENDER_TIMEOUT_MS,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            directory: PathBuf::from(DEFAULT_DIRECTORY),
        }
    }
}

impl CacheConfig {
    pub fn stale_grace(&self) -> Option<Duration> {
        self.stale_grace_seconds.map(Duration::from_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn policy(&self) -> RevalidationPolicy {
        RevalidationPolicy::new(self.stale_grace())
    }

    /// Construct the configured backend.
    pub async fn open_store(&self) -> Result<Arc<dyn Store>, StoreError> {
        Ok(match self.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new(self.memory_capacity_non_zero())),
            StoreBackend::Disk => Arc::new(FileSystemStore::open(&self.directory).await?),
        })
    }
}
