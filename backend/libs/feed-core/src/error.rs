//! Error types shared by both services.

use thiserror::Error;

/// Result type for feed-core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("external service error: {0}")]
    External(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// True for failures that should degrade to an empty result instead of
    /// propagating (transient network / external service, spec policy 1).
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::External(_))
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        CoreError::External(e.to_string())
    }
}
