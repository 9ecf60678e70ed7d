use thiserror::Error;

use crate::retry::Retryable;

/// Errors raised by the content platform client.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The platform refused a request that carried a `before` cursor. This is
    /// how a stale or inaccessible cursor item shows up.
    #[error("Platform refused cursor-based request to {path} (before={before})")]
    Forbidden { path: String, before: String },

    #[error("HTTP error {status} requesting {path}")]
    HttpStatus { status: u16, path: String },

    #[error("HTTP error requesting {path}: {source}")]
    Http {
        path: String,
        source: reqwest::Error,
    },

    #[error("Token exchange failed: {0}")]
    Auth(String),

    #[error("Unexpected response from {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PlatformError {
    /// Whether the platform rejected the supplied listing cursor.
    pub fn is_stale_cursor(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }
}

impl Retryable for PlatformError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::Http { source, .. } => source.is_connect() || source.is_timeout(),
            Self::Forbidden { .. }
            | Self::Auth(_)
            | Self::Malformed { .. }
            | Self::Unsupported(_)
            | Self::Json(_) => false,
        }
    }
}
