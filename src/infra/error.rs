use thiserror::Error;

use crate::cache::StoreError;
use crate::config::LoadError;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
}

impl InfraError {
    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}
