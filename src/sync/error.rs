use thiserror::Error;

use crate::platform::PlatformError;
use crate::state::StateError;
use crate::store::StoreError;
use crate::types::Category;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a sync step, classified for the scheduler.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("User {0} does not exist")]
    NotFound(String),

    /// The user was purged or the handle released mid-sync.
    #[error("Document store is no longer available ({})", scope(.category))]
    StoreUnavailable { category: Option<Category> },

    /// The platform refused the stored cursor for this category.
    #[error("Stored cursor rejected for {category}: {source}")]
    StaleCursor {
        category: Category,
        #[source]
        source: PlatformError,
    },

    /// Network, platform or store trouble that a later cycle may not hit.
    #[error("Transient failure ({}): {source}", scope(.category))]
    Transient {
        category: Option<Category>,
        #[source]
        source: BoxError,
    },

    /// Writing the collected batches failed; nothing was persisted.
    #[error("Commit failed: {source}")]
    Commit {
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

fn scope(category: &Option<Category>) -> String {
    match category {
        Some(c) => c.to_string(),
        None => "user".to_string(),
    }
}

impl SyncError {
    pub fn from_platform(category: Option<Category>, err: PlatformError) -> Self {
        match category {
            Some(category) if err.is_stale_cursor() => Self::StaleCursor {
                category,
                source: err,
            },
            _ => Self::Transient {
                category,
                source: Box::new(err),
            },
        }
    }

    pub fn from_store(category: Option<Category>, err: StoreError) -> Self {
        if err.is_invalidated() {
            Self::StoreUnavailable { category }
        } else {
            Self::Transient {
                category,
                source: Box::new(err),
            }
        }
    }

    pub fn is_stale_cursor(&self) -> bool {
        matches!(self, Self::StaleCursor { .. })
    }

    #[cfg(test)]
    pub fn category(&self) -> Option<Category> {
        match self {
            Self::StaleCursor { category, .. } => Some(*category),
            Self::StoreUnavailable { category } | Self::Transient { category, .. } => *category,
            Self::NotFound(_) | Self::Commit { .. } | Self::Fatal(_) => None,
        }
    }
}

impl From<StateError> for SyncError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::UserNotFound(username) => Self::NotFound(username),
            other => Self::Fatal(other.into()),
        }
    }
}

impl From<crate::crypto::CryptoError> for SyncError {
    fn from(err: crate::crypto::CryptoError) -> Self {
        Self::Fatal(anyhow::Error::new(err).context("failed to decrypt stored secret"))
    }
}
