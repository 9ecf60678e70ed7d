use thiserror::Error;

use crate::retry::Retryable;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The handle was released or the user was purged while work was in flight.
    #[error("Document store handle for {username} is no longer valid")]
    Invalidated { username: String },

    #[error("HTTP error {status} writing to {path}")]
    HttpStatus { status: u16, path: String },

    #[error("HTTP error accessing {path}: {source}")]
    Http {
        path: String,
        source: reqwest::Error,
    },

    #[error("Document store rejected the operation: {0}")]
    Rejected(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_invalidated(&self) -> bool {
        matches!(self, Self::Invalidated { .. })
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::Http { source, .. } => source.is_connect() || source.is_timeout(),
            Self::Invalidated { .. } | Self::Rejected(_) | Self::Json(_) => false,
        }
    }
}
