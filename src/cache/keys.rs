//! Cache key definitions.
//!
//! A [`CacheKey`] is opaque to the cache: two keys are the same entry only when
//! their bytes are identical.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Stable identifier for one cacheable unit of output.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Arc::from(key.into()))
    }

    /// Default derivation for callers without their own route resolution.
    ///
    /// Produces `[locale:]route[?k=v&...]` with parameters in map order.
    pub fn from_route(route: &str, params: &BTreeMap<String, String>, locale: Option<&str>) -> Self {
        let mut key = String::with_capacity(route.len() + 16);
        if let Some(locale) = locale {
            key.push_str(locale);
            key.push(':');
        }
        key.push_str(route);
        for (index, (name, value)) in params.iter().enumerate() {
            key.push(if index == 0 { '?' } else { '&' });
            key.push_str(name);
            key.push('=');
            key.push_str(value);
        }
        Self::new(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex SHA-256 of the key bytes, usable as a file name.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CacheKey").field(&self.as_str()).finish()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
