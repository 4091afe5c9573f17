//! Metric names emitted by the cache.

/// Lookups by served path, labelled `outcome` = hit | stale | miss | expired | degraded | error.
pub const METRIC_LOOKUP_TOTAL: &str = "render_cache_lookup_total";
/// Regenerations by result, labelled `result` = committed | conflict | failed | superseded.
pub const METRIC_REGENERATION_TOTAL: &str = "render_cache_regeneration_total";
/// Callers that attached to an in-flight regeneration instead of starting one.
pub const METRIC_FLIGHT_JOINED_TOTAL: &str = "render_cache_flight_joined_total";
pub const METRIC_RENDER_MS: &str = "render_cache_render_ms";
pub const METRIC_STORE_EVICT_TOTAL: &str = "render_cache_store_evict_total";
pub const METRIC_PURGED_KEYS_TOTAL: &str = "render_cache_purged_keys_total";
