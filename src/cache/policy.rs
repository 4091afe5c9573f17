//! Revalidation policy.
//!
//! Pure classification of an entry against the current time. Nothing here
//! touches storage or schedules work.

use std::fmt;
use std::time::Duration;

use time::OffsetDateTime;

use super::entry::{CacheEntry, Revalidate};

/// Outcome of classifying a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Freshness {
    /// No entry exists.
    Miss,
    /// Serve as-is.
    Fresh,
    /// Serve immediately and refresh in the background.
    Stale,
    /// Past the grace window: refresh before responding.
    HardExpired,
}

impl Freshness {
    pub fn needs_regeneration(self) -> bool {
        !matches!(self, Freshness::Fresh)
    }

    /// Whether the requester must wait for the regeneration.
    pub fn blocks(self) -> bool {
        matches!(self, Freshness::Miss | Freshness::HardExpired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Freshness::Miss => "miss",
            Freshness::Fresh => "fresh",
            Freshness::Stale => "stale",
            Freshness::HardExpired => "hard_expired",
        }
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stale-serving policy.
///
/// The grace window is how long past `revalidate_after` a stale body may still
/// be served without blocking. `None` makes it equal to the entry's own
/// `revalidate_after`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevalidationPolicy {
    stale_grace: Option<Duration>,
}

impl RevalidationPolicy {
    pub fn new(stale_grace: Option<Duration>) -> Self {
        Self { stale_grace }
    }

    pub fn grace_for(&self, revalidate_after: Duration) -> Duration {
        self.stale_grace.unwrap_or(revalidate_after)
    }

    pub fn classify(&self, entry: Option<&CacheEntry>, now: OffsetDateTime) -> Freshness {
        let Some(entry) = entry else {
            return Freshness::Miss;
        };

        match entry.revalidate {
            Revalidate::Never => Freshness::Fresh,
            Revalidate::Always => Freshness::Stale,
            Revalidate::After(after) => {
                let age = entry.age(now);
                if age < after {
                    Freshness::Fresh
                } else if age < after.saturating_add(self.grace_for(after)) {
                    Freshness::Stale
                } else {
                    Freshness::HardExpired
                }
            }
        }
    }
}
