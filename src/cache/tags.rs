//! Tag index for on-demand invalidation.
//!
//! Maps tag → keys and key → tags. The index only references keys; entry data
//! lives in the [`Store`]. References can go stale (LRU eviction, a write that
//! lost its race) and are filtered when a purge runs: deleting an absent key
//! is not counted.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use metrics::counter;
use tracing::{debug, info};

use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};
use super::metrics::METRIC_PURGED_KEYS_TOTAL;
use super::store::{Store, StoreError};

const SOURCE: &str = "cache::tags";

#[derive(Default)]
struct Maps {
    tag_to_keys: HashMap<String, HashSet<CacheKey>>,
    key_to_tags: HashMap<CacheKey, HashSet<String>>,
}

impl Maps {
    fn link(&mut self, tag: &str, key: &CacheKey) {
        self.tag_to_keys
            .entry(tag.to_string())
            .or_default()
            .insert(key.clone());
        self.key_to_tags
            .entry(key.clone())
            .or_default()
            .insert(tag.to_string());
    }

    fn unlink(&mut self, tag: &str, key: &CacheKey) {
        if let Some(keys) = self.tag_to_keys.get_mut(tag) {
            keys.remove(key);
            if keys.is_empty() {
                self.tag_to_keys.remove(tag);
            }
        }
    }
}

/// Secondary index from invalidation tag to affected keys.
pub struct TagIndex {
    maps: RwLock<Maps>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
        }
    }

    pub fn associate(&self, tag: &str, key: &CacheKey) {
        rw_write(&self.maps, SOURCE, "associate").link(tag, key);
    }

    /// Make `tags` the complete tag set for `key`, dropping older associations.
    pub fn replace_tags(&self, key: &CacheKey, tags: &BTreeSet<String>) {
        let mut maps = rw_write(&self.maps, SOURCE, "replace_tags");
        let previous = maps.key_to_tags.remove(key).unwrap_or_default();
        for tag in previous.iter().filter(|tag| !tags.contains(*tag)) {
            maps.unlink(tag, key);
        }
        for tag in tags {
            maps.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        if !tags.is_empty() {
            maps.key_to_tags
                .insert(key.clone(), tags.iter().cloned().collect());
        }
    }

    pub fn keys_for_tag(&self, tag: &str) -> HashSet<CacheKey> {
        rw_read(&self.maps, SOURCE, "keys_for_tag")
            .tag_to_keys
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    pub fn tags_for_key(&self, key: &CacheKey) -> HashSet<String> {
        rw_read(&self.maps, SOURCE, "tags_for_key")
            .key_to_tags
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every association of `key`, returning the tags it carried.
    pub fn forget_key(&self, key: &CacheKey) -> HashSet<String> {
        let mut maps = rw_write(&self.maps, SOURCE, "forget_key");
        let tags = maps.key_to_tags.remove(key).unwrap_or_default();
        for tag in &tags {
            maps.unlink(tag, key);
        }
        tags
    }

    /// Delete every key associated with `tag` from `store` and drop the bucket.
    ///
    /// Returns the number of entries actually removed. The bucket is unlinked
    /// before any delete runs, so a key committed and tagged while the purge is
    /// in progress stays indexed and is caught by the next purge. Links to the
    /// purged keys under other tags are left for those tags' purges to skip.
    pub async fn purge_tag(&self, tag: &str, store: &dyn Store) -> Result<usize, StoreError> {
        let snapshot = {
            let mut maps = rw_write(&self.maps, SOURCE, "purge_tag.snapshot");
            let snapshot = maps.tag_to_keys.remove(tag).unwrap_or_default();
            for key in &snapshot {
                if let Some(tags) = maps.key_to_tags.get_mut(key) {
                    tags.remove(tag);
                    if tags.is_empty() {
                        maps.key_to_tags.remove(key);
                    }
                }
            }
            snapshot
        };

        let mut purged = 0;
        for (index, key) in snapshot.iter().enumerate() {
            match store.delete(key).await {
                Ok(true) => purged += 1,
                Ok(false) => debug!(tag, %key, "skipping stale tag reference"),
                Err(err) => {
                    // Keep the unprocessed keys reachable so a retry can finish the purge.
                    let mut maps = rw_write(&self.maps, SOURCE, "purge_tag.restore");
                    for key in snapshot.iter().skip(index) {
                        maps.link(tag, key);
                    }
                    return Err(err);
                }
            }
        }

        info!(tag, purged, referenced = snapshot.len(), "purged cache tag");
        counter!(METRIC_PURGED_KEYS_TOTAL).increment(purged as u64);
        Ok(purged)
    }

    /// Drop references to keys that are no longer in `store`.
    pub async fn compact(&self, store: &dyn Store) -> Result<usize, StoreError> {
        let keys: Vec<CacheKey> = rw_read(&self.maps, SOURCE, "compact.snapshot")
            .key_to_tags
            .keys()
            .cloned()
            .collect();

        let mut removed = 0;
        for key in keys {
            if store.get(&key).await?.is_none() {
                self.forget_key(&key);
                removed += 1;
            }
        }
        debug!(removed, "compacted tag index");
        Ok(removed)
    }

    /// Rebuild the index from the tags recorded on stored entries.
    pub async fn rebuild(&self, store: &dyn Store) -> Result<usize, StoreError> {
        let mut rebuilt = Maps::default();
        for key in store.list_keys("").await? {
            let Some(entry) = store.get(&key).await? else {
                continue;
            };
            for tag in &entry.tags {
                rebuilt
                    .tag_to_keys
                    .entry(tag.clone())
                    .or_default()
                    .insert(key.clone());
            }
            if !entry.tags.is_empty() {
                rebuilt
                    .key_to_tags
                    .insert(key, entry.tags.into_iter().collect());
            }
        }

        let mut maps = rw_write(&self.maps, SOURCE, "rebuild");
        *maps = rebuilt;
        Ok(maps.key_to_tags.len())
    }

    pub fn tag_count(&self) -> usize {
        rw_read(&self.maps, SOURCE, "tag_count").tag_to_keys.len()
    }

    pub fn key_count(&self) -> usize {
        rw_read(&self.maps, SOURCE, "key_count").key_to_tags.len()
    }
}

impl Default for TagIndex {
    fn default() -> Self {
        Self::new()
    }
}
