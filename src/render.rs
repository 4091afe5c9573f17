//! Render contract consumed by the cache.
//!
//! The cache never renders anything itself. It hands a [`RouteRequest`] to a
//! [`Renderer`] and stores whatever comes back. Renderers may be slow and may
//! fail; the scheduler bounds each call with a deadline.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::cache::{CacheKey, Revalidate};

/// A resolved route ready to be looked up or rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequest {
    pub key: CacheKey,
    pub route: String,
    pub params: BTreeMap<String, String>,
}

impl RouteRequest {
    /// Build a request whose key is derived with [`CacheKey::from_route`].
    pub fn new(route: impl Into<String>, params: BTreeMap<String, String>) -> Self {
        let route = route.into();
        let key = CacheKey::from_route(&route, &params, None);
        Self { key, route, params }
    }

    /// Build a request with a caller-resolved key.
    pub fn with_key(
        key: impl Into<CacheKey>,
        route: impl Into<String>,
        params: BTreeMap<String, String>,
    ) -> Self {
        Self {
            key: key.into(),
            route: route.into(),
            params,
        }
    }

    /// Re-derive the key with a content-negotiation locale.
    pub fn localized(mut self, locale: &str) -> Self {
        self.key = CacheKey::from_route(&self.route, &self.params, Some(locale));
        self
    }
}

/// Output of one render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    pub body: Bytes,
    pub tags: BTreeSet<String>,
    pub revalidate: Revalidate,
}

impl RenderOutput {
    /// A fully static output with no tags.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            tags: BTreeSet::new(),
            revalidate: Revalidate::Never,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_revalidate(mut self, revalidate: impl Into<Revalidate>) -> Self {
        self.revalidate = revalidate.into();
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("render failed: {message}")]
    Failed { message: String },
    #[error("render timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },
    #[error("render task aborted: {message}")]
    Aborted { message: String },
}

impl RenderError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Turns a route and its parameters into output bytes.
///
/// Must be callable concurrently for different keys. The cache guarantees a
/// single in-flight call per key.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        route: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<RenderOutput, RenderError>;
}
