//! Rendered-output cache with stale-while-revalidate serving, single-flight
//! regeneration and tag-based invalidation.

pub mod cache;
pub mod config;
pub mod infra;
pub mod render;
