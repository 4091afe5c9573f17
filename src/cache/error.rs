use thiserror::Error;

use super::store::StoreError;
use crate::render::RenderError;

/// Failures surfaced to callers of a lookup.
///
/// Internal races (write conflicts, stale tag references) never appear here.
/// `Clone` so one regeneration result can be delivered to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
    #[error(transparent)]
    RenderFailed(#[from] RenderError),
}

impl LookupError {
    pub fn is_render_failure(&self) -> bool {
        matches!(self, LookupError::RenderFailed(_))
    }
}
