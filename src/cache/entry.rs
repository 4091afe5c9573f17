//! Cached entry model and its freshness metadata.

use std::collections::BTreeSet;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::keys::CacheKey;

/// Version counter for optimistic replacement of a single key.
pub type Generation = u64;

/// How an entry ages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Revalidate {
    /// Fully static: never auto-expires, only purges remove it.
    #[default]
    Never,
    /// Fully dynamic: stale on every access.
    Always,
    /// Time-revalidated after the given duration.
    After(Duration),
}

impl Revalidate {
    pub fn after_secs(seconds: u64) -> Self {
        Duration::from_secs(seconds).into()
    }

    /// Persisted form: `None` is never, `Some(0)` is always.
    pub fn as_millis(self) -> Option<u64> {
        match self {
            Revalidate::Never => None,
            Revalidate::Always => Some(0),
            Revalidate::After(after) => Some(u64::try_from(after.as_millis()).unwrap_or(u64::MAX)),
        }
    }

    pub fn from_millis(millis: Option<u64>) -> Self {
        millis.map(Duration::from_millis).into()
    }
}

impl From<Duration> for Revalidate {
    fn from(after: Duration) -> Self {
        if after.is_zero() {
            Revalidate::Always
        } else {
            Revalidate::After(after)
        }
    }
}

impl From<Option<Duration>> for Revalidate {
    fn from(after: Option<Duration>) -> Self {
        after.map_or(Revalidate::Never, Revalidate::from)
    }
}

/// One cached unit. Never mutated in place; replaced wholesale with a newer generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub body: Bytes,
    pub created_at: OffsetDateTime,
    pub revalidate: Revalidate,
    pub tags: BTreeSet<String>,
    pub generation: Generation,
}

impl CacheEntry {
    /// Elapsed time since creation; clock skew into the future reads as zero.
    pub fn age(&self, now: OffsetDateTime) -> Duration {
        Duration::try_from(now - self.created_at).unwrap_or(Duration::ZERO)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn zero_duration_means_always() {
        assert_eq!(Revalidate::from(Duration::ZERO), Revalidate::Always);
        assert_eq!(Revalidate::from(None), Revalidate::Never);
        assert_eq!(
            Revalidate::from(Some(Duration::from_secs(10))),
            Revalidate::After(Duration::from_secs(10))
        );
    }

    #[test]
    fn millis_form_matches_persisted_layout() {
        assert_eq!(Revalidate::Never.as_millis(), None);
        assert_eq!(Revalidate::Always.as_millis(), Some(0));
        assert_eq!(Revalidate::after_secs(3).as_millis(), Some(3000));

        assert_eq!(Revalidate::from_millis(None), Revalidate::Never);
        assert_eq!(Revalidate::from_millis(Some(0)), Revalidate::Always);
        assert_eq!(Revalidate::from_millis(Some(1500)), Revalidate::After(Duration::from_millis(1500)));
    }

    #[test]
    fn age_clamps_future_creation_to_zero() {
        let entry = CacheEntry {
            key: CacheKey::new("/"),
            body: Bytes::from_static(b"home"),
            created_at: datetime!(2024-01-01 00:00:10 UTC),
            revalidate: Revalidate::Never,
            tags: BTreeSet::new(),
            generation: 1,
        };

        assert_eq!(entry.age(datetime!(2024-01-01 00:00:00 UTC)), Duration::ZERO);
        assert_eq!(entry.age(datetime!(2024-01-01 00:00:15 UTC)), Duration::from_secs(5));
    }
}
