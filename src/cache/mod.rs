//! Render output cache.
//!
//! Stores rendered bodies per [`CacheKey`] and serves them through a
//! stale-while-revalidate [`Scheduler`]:
//!
//! - **Fresh** entries are served directly.
//! - **Stale** entries are served while one background regeneration runs.
//! - **Missing** or **hard-expired** entries block on a regeneration shared by
//!   every concurrent caller of the same key.
//!
//! Writes are generation-checked ([`Store::put`]), so an older regeneration can
//! never overwrite a newer one. Tags recorded on each entry feed the
//! [`TagIndex`] for on-demand invalidation.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "memory"          # or "disk"
//! stale_grace_seconds = 60    # unset: grace equals the revalidate interval
//! render_timeout_ms = 10000
//! memory_capacity = 1000
//! directory = ".render-cache"
//! ```

mod config;
mod disk;
mod entry;
mod error;
mod flight;
mod keys;
mod lock;
pub mod metrics;
mod policy;
mod scheduler;
mod store;
mod tags;

pub use config::{CacheConfig, StoreBackend};
pub use disk::FileSystemStore;
pub use entry::{CacheEntry, Generation, Revalidate};
pub use error::LookupError;
pub use flight::{Flight, FlightResult, SingleFlight};
pub use keys::CacheKey;
pub use policy::{Freshness, RevalidationPolicy};
pub use scheduler::{CacheStatus, Clock, ScheduledResult, Scheduler, SchedulerBuilder};
pub use store::{MemoryStore, PutOutcome, Store, StoreError};
pub use tags::TagIndex;
