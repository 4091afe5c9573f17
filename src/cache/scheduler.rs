//! Request-facing entry point.
//!
//! A lookup reads the store, classifies the entry and then takes one of three
//! paths: serve it, serve it while a background regeneration runs, or wait for
//! a regeneration. All regenerations go through [`SingleFlight`], and commits
//! go through the store's generation compare-and-swap.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use metrics::{counter, histogram};
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use super::config::CacheConfig;
use super::entry::{CacheEntry, Generation};
use super::error::LookupError;
use super::flight::{Flight, FlightResult, SingleFlight};
use super::keys::CacheKey;
use super::metrics::{METRIC_LOOKUP_TOTAL, METRIC_REGENERATION_TOTAL, METRIC_RENDER_MS};
use super::policy::{Freshness, RevalidationPolicy};
use super::store::{PutOutcome, Store, StoreError};
use super::tags::TagIndex;
use crate::render::{RenderError, RenderOutput, Renderer, RouteRequest};

/// Source of "now" for classification and entry timestamps.
pub type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync>;

type Loader = BoxFuture<'static, Result<RenderOutput, RenderError>>;

/// Which path a lookup took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// Fresh entry served directly.
    Hit,
    /// Stale entry served; a background regeneration was dispatched.
    Stale,
    /// No entry; the request waited for the first render.
    Miss,
    /// Entry past its grace window; the request waited for a regeneration.
    Expired,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Stale => "STALE",
            CacheStatus::Miss => "MISS",
            CacheStatus::Expired => "EXPIRED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledResult {
    pub body: Bytes,
    pub generation: Generation,
    pub status: CacheStatus,
    /// A background regeneration was dispatched (or joined) for this key.
    pub revalidating: bool,
    /// Set when a failed regeneration forced an expired body to be served.
    pub degraded: Option<LookupError>,
}

impl ScheduledResult {
    fn served(entry: CacheEntry, status: CacheStatus) -> Self {
        Self {
            body: entry.body,
            generation: entry.generation,
            status,
            revalidating: false,
            degraded: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

struct Inner {
    store: Arc<dyn Store>,
    renderer: Arc<dyn Renderer>,
    tags: Arc<TagIndex>,
    flights: SingleFlight,
    policy: RevalidationPolicy,
    render_timeout: Duration,
    clock: Clock,
}

pub struct SchedulerBuilder {
    store: Arc<dyn Store>,
    renderer: Arc<dyn Renderer>,
    config: CacheConfig,
    tags: Option<Arc<TagIndex>>,
    clock: Option<Clock>,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: &CacheConfig) -> Self {
        self.config = config.clone();
        self
    }

    /// Share an existing tag index, e.g. one rebuilt from a disk store.
    pub fn tag_index(mut self, tags: Arc<TagIndex>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> OffsetDateTime + Send + Sync + 'static,
    {
        let clock: Clock = Arc::new(clock);
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Scheduler {
        let clock: Clock = match self.clock {
            Some(clock) => clock,
            None => Arc::new(OffsetDateTime::now_utc),
        };
        Scheduler {
            inner: Arc::new(Inner {
                store: self.store,
                renderer: self.renderer,
                tags: self.tags.unwrap_or_default(),
                flights: SingleFlight::new(),
                policy: self.config.policy(),
                render_timeout: self.config.render_timeout(),
                clock,
            }),
        }
    }
}

/// Cheap to clone; clones share store, tag index and in-flight state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn builder(store: Arc<dyn Store>, renderer: Arc<dyn Renderer>) -> SchedulerBuilder {
        SchedulerBuilder {
            store,
            renderer,
            config: CacheConfig::default(),
            tags: None,
            clock: None,
        }
    }

    pub fn new(store: Arc<dyn Store>, renderer: Arc<dyn Renderer>, config: &CacheConfig) -> Self {
        Self::builder(store, renderer).config(config).build()
    }

    /// Serve `request`, rendering through the configured [`Renderer`] when needed.
    #[instrument(skip(self, request), fields(key = %request.key))]
    pub async fn lookup(&self, request: &RouteRequest) -> Result<ScheduledResult, LookupError> {
        let renderer = Arc::clone(&self.inner.renderer);
        let route = request.route.clone();
        let params = request.params.clone();
        self.serve(&request.key, move || {
            async move { renderer.render(&route, &params).await }.boxed()
        })
        .await
    }

    /// Serve a sub-resource produced by `loader` through the same cache pipeline.
    ///
    /// `loader` runs only when this call has to start a regeneration.
    #[instrument(skip(self, key, loader), fields(key = %key))]
    pub async fn cached<F, Fut>(
        &self,
        key: &CacheKey,
        loader: F,
    ) -> Result<ScheduledResult, LookupError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<RenderOutput, RenderError>> + Send + 'static,
    {
        self.serve(key, move || loader().boxed()).await
    }

    /// Purge every entry carrying `tag`. The next read of each takes the miss path.
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<usize, StoreError> {
        self.inner.tags.purge_tag(tag, self.inner.store.as_ref()).await
    }

    pub async fn invalidate_by_key(&self, key: &CacheKey) -> Result<bool, StoreError> {
        // Unlink first: a commit racing the delete re-links its own tags.
        let unlinked = self.inner.tags.forget_key(key);
        let removed = match self.inner.store.delete(key).await {
            Ok(removed) => removed,
            Err(err) => {
                for tag in &unlinked {
                    self.inner.tags.associate(tag, key);
                }
                return Err(err);
            }
        };
        debug!(%key, removed, "invalidated cache key");
        Ok(removed)
    }

    /// Raw store read, bypassing policy.
    pub async fn peek(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        self.inner.store.get(key).await
    }

    /// Keys carrying `tag` that are still present in the store.
    ///
    /// References left behind by eviction or a lost write race are skipped.
    pub async fn keys_for_tag(&self, tag: &str) -> Result<HashSet<CacheKey>, StoreError> {
        let mut live = HashSet::new();
        for key in self.inner.tags.keys_for_tag(tag) {
            match self.inner.store.get(&key).await? {
                Some(entry) if entry.tags.contains(tag) => {
                    live.insert(key);
                }
                _ => debug!(tag, %key, "skipping stale tag reference"),
            }
        }
        Ok(live)
    }

    pub fn is_revalidating(&self, key: &CacheKey) -> bool {
        self.inner.flights.is_in_flight(key)
    }

    pub fn classify(&self, entry: Option<&CacheEntry>) -> Freshness {
        self.inner.policy.classify(entry, self.now())
    }

    pub fn tag_index(&self) -> &Arc<TagIndex> {
        &self.inner.tags
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    fn now(&self) -> OffsetDateTime {
        (self.inner.clock)()
    }

    async fn serve<L>(&self, key: &CacheKey, loader: L) -> Result<ScheduledResult, LookupError>
    where
        L: FnOnce() -> Loader + Send + 'static,
    {
        let current = match self.inner.store.get(key).await {
            Ok(current) => current,
            Err(err) => {
                record_lookup("error");
                return Err(err.into());
            }
        };
        let freshness = self.inner.policy.classify(current.as_ref(), self.now());

        let Some(entry) = current else {
            debug!(%key, freshness = %freshness, "cache miss, blocking on regeneration");
            let result = self.dispatch(key, None, loader).wait().await;
            record_lookup(if result.is_ok() { "miss" } else { "error" });
            return result.map(|fresh| ScheduledResult::served(fresh, CacheStatus::Miss));
        };

        if !freshness.needs_regeneration() {
            debug!(%key, generation = entry.generation, "serving fresh entry");
            record_lookup("hit");
            return Ok(ScheduledResult::served(entry, CacheStatus::Hit));
        }

        if !freshness.blocks() {
            let flight = self.dispatch(key, Some(entry.generation), loader);
            debug!(
                %key,
                generation = entry.generation,
                started = flight.is_leader(),
                "serving stale entry, regenerating in background"
            );
            drop(flight);
            record_lookup("stale");
            return Ok(ScheduledResult {
                revalidating: true,
                ..ScheduledResult::served(entry, CacheStatus::Stale)
            });
        }

        debug!(%key, generation = entry.generation, "entry expired, blocking on regeneration");
        match self.dispatch(key, Some(entry.generation), loader).wait().await {
            Ok(fresh) => {
                record_lookup("expired");
                Ok(ScheduledResult::served(fresh, CacheStatus::Expired))
            }
            Err(err) => {
                warn!(
                    %key,
                    generation = entry.generation,
                    error = %err,
                    "regeneration failed, serving expired entry"
                );
                record_lookup("degraded");
                Ok(ScheduledResult {
                    degraded: Some(err),
                    ..ScheduledResult::served(entry, CacheStatus::Expired)
                })
            }
        }
    }

    fn dispatch<L>(&self, key: &CacheKey, observed: Option<Generation>, loader: L) -> Flight
    where
        L: FnOnce() -> Loader + Send + 'static,
    {
        let scheduler = self.clone();
        let owned_key = key.clone();
        self.inner.flights.run(key, observed, move || async move {
            scheduler.regenerate(owned_key, observed, loader).await
        })
    }

    async fn regenerate<L>(
        &self,
        key: CacheKey,
        observed: Option<Generation>,
        loader: L,
    ) -> FlightResult
    where
        L: FnOnce() -> Loader + Send + 'static,
    {
        // Only a fresh replacement short-circuits; the commit is always checked
        // against the generation this flight was dispatched for.
        let current = self.inner.store.get(&key).await?;
        if current.as_ref().map(|entry| entry.generation) != observed
            && let Some(entry) = current.filter(|entry| {
                self.inner.policy.classify(Some(entry), self.now()) == Freshness::Fresh
            })
        {
            debug!(%key, generation = entry.generation, "regeneration superseded by a fresh entry");
            record_regeneration("superseded");
            return Ok(entry);
        }

        let started_at = Instant::now();
        let output = match tokio::time::timeout(self.inner.render_timeout, loader()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                warn!(%key, error = %err, "render failed");
                record_regeneration("failed");
                return Err(err.into());
            }
            Err(_) => {
                let err = RenderError::Timeout {
                    after: self.inner.render_timeout,
                };
                warn!(%key, error = %err, "render timed out");
                record_regeneration("failed");
                return Err(err.into());
            }
        };
        histogram!(METRIC_RENDER_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        let entry = CacheEntry {
            key: key.clone(),
            body: output.body,
            created_at: self.now(),
            revalidate: output.revalidate,
            tags: output.tags,
            generation: observed.map_or(1, |generation| generation + 1),
        };

        match self.inner.store.put(entry.clone(), observed).await? {
            PutOutcome::Stored => {
                self.inner.tags.replace_tags(&key, &entry.tags);
                debug!(%key, generation = entry.generation, "committed regenerated entry");
                record_regeneration("committed");
            }
            PutOutcome::Conflict { current } => {
                debug!(
                    %key,
                    attempted = entry.generation,
                    current = ?current,
                    "write conflict, delivering result without committing"
                );
                record_regeneration("conflict");
            }
        }

        Ok(entry)
    }
}

fn record_lookup(outcome: &'static str) {
    counter!(METRIC_LOOKUP_TOTAL, "outcome" => outcome).increment(1);
}

fn record_regeneration(result: &'static str) {
    counter!(METRIC_REGENERATION_TOTAL, "result" => result).increment(1);
}
