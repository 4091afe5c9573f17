//! File-system backed cache store.
//!
//! Layout per key, named by the key's SHA-256 digest:
//!
//! ```text
//! <root>/<digest>.json         metadata, written last
//! <root>/<digest>.<gen>.body   rendered body for generation <gen>
//! ```
//!
//! Files are written to a temporary name and renamed into place, so readers
//! only ever see a committed metadata record. Within one process an async
//! read/write lock serializes writers, and a reader never sees metadata whose
//! body a concurrent commit has already removed.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::{fs, sync::RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use super::entry::{CacheEntry, Generation, Revalidate};
use super::keys::CacheKey;
use super::store::{PutOutcome, Store, StoreError, check_generation};

const META_EXTENSION: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    created_at_ms: i64,
    revalidate_after_ms: Option<u64>,
    tags: BTreeSet<String>,
    generation: Generation,
}

impl EntryMeta {
    fn from_entry(entry: &CacheEntry) -> Self {
        let created_at_ms = entry.created_at.unix_timestamp_nanos() / 1_000_000;
        Self {
            key: entry.key.as_str().to_string(),
            created_at_ms: i64::try_from(created_at_ms).unwrap_or(i64::MAX),
            revalidate_after_ms: entry.revalidate.as_millis(),
            tags: entry.tags.clone(),
            generation: entry.generation,
        }
    }

    fn into_entry(self, body: Bytes) -> Result<CacheEntry, StoreError> {
        let created_at =
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.created_at_ms) * 1_000_000)
                .map_err(|err| {
                    StoreError::unavailable(format!("corrupt timestamp for `{}`: {err}", self.key))
                })?;
        Ok(CacheEntry {
            key: CacheKey::new(self.key),
            body,
            created_at,
            revalidate: Revalidate::from_millis(self.revalidate_after_ms),
            tags: self.tags,
            generation: self.generation,
        })
    }
}

pub struct FileSystemStore {
    root: PathBuf,
    lock: RwLock<()>,
}

impl FileSystemStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|err| io_error("create directory", &root, err))?;
        Ok(Self {
            root,
            lock: RwLock::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.{META_EXTENSION}", key.digest()))
    }

    fn body_path(&self, key: &CacheKey, generation: Generation) -> PathBuf {
        self.root.join(format!("{}.{generation}.body", key.digest()))
    }

    async fn read_meta(&self, path: &Path) -> Result<Option<EntryMeta>, StoreError> {
        let raw = match fs::read(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error("read metadata", path, err)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|err| StoreError::unavailable(format!("corrupt metadata {}: {err}", path.display())))
    }

    /// Metadata for `key`, ignoring a record whose digest collided with another key.
    async fn read_key_meta(&self, key: &CacheKey) -> Result<Option<EntryMeta>, StoreError> {
        Ok(self
            .read_meta(&self.meta_path(key))
            .await?
            .filter(|meta| meta.key == key.as_str()))
    }

    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let staging = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        fs::write(&staging, contents)
            .await
            .map_err(|err| io_error("write", &staging, err))?;
        if let Err(err) = fs::rename(&staging, path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(io_error("rename", path, err));
        }
        Ok(())
    }

    async fn remove_if_exists(&self, path: &Path) -> Result<bool, StoreError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error("remove", path, err)),
        }
    }
}

#[async_trait]
impl Store for FileSystemStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let _guard = self.lock.read().await;
        let Some(meta) = self.read_key_meta(key).await? else {
            return Ok(None);
        };

        let body_path = self.body_path(key, meta.generation);
        let body = match fs::read(&body_path).await {
            Ok(body) => Bytes::from(body),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(%key, generation = meta.generation, "body file missing for committed metadata");
                return Ok(None);
            }
            Err(err) => return Err(io_error("read body", &body_path, err)),
        };

        meta.into_entry(body).map(Some)
    }

    async fn put(
        &self,
        entry: CacheEntry,
        observed: Option<Generation>,
    ) -> Result<PutOutcome, StoreError> {
        let _guard = self.lock.write().await;

        let current = self
            .read_key_meta(&entry.key)
            .await?
            .map(|meta| meta.generation);
        let outcome = check_generation(current, observed, entry.generation);
        if !outcome.is_stored() {
            return Ok(outcome);
        }

        let meta = serde_json::to_vec(&EntryMeta::from_entry(&entry))
            .map_err(|err| StoreError::unavailable(format!("encode metadata: {err}")))?;
        self.write_atomic(&self.body_path(&entry.key, entry.generation), &entry.body)
            .await?;
        self.write_atomic(&self.meta_path(&entry.key), &meta).await?;

        if let Some(previous) = current {
            let stale_body = self.body_path(&entry.key, previous);
            if let Err(err) = self.remove_if_exists(&stale_body).await {
                debug!(key = %entry.key, error = %err, "failed to remove superseded body file");
            }
        }

        Ok(PutOutcome::Stored)
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let _guard = self.lock.write().await;

        let Some(meta) = self.read_key_meta(key).await? else {
            return Ok(false);
        };
        self.remove_if_exists(&self.meta_path(key)).await?;
        self.remove_if_exists(&self.body_path(key, meta.generation))
            .await?;
        Ok(true)
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<CacheKey>, StoreError> {
        let mut dir = fs::read_dir(&self.root)
            .await
            .map_err(|err| io_error("list", &self.root, err))?;

        let mut keys = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|err| io_error("list", &self.root, err))?
        {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(META_EXTENSION) {
                continue;
            }
            if let Some(meta) = self.read_meta(&path).await?
                && meta.key.starts_with(prefix)
            {
                keys.push(CacheKey::new(meta.key));
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn io_error(op: &str, path: &Path, err: std::io::Error) -> StoreError {
    StoreError::unavailable(format!("{op} {}: {err}", path.display()))
}
