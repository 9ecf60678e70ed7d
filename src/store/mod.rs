//! Per-user document store.
//!
//! Each user brings their own realtime database. A sync opens a short-lived
//! [`StoreHandle`] on it, writes the category batches, and releases the
//! handle. Purging a user invalidates every open handle so in-flight work
//! stops at its next checkpoint.

pub mod error;
#[cfg(test)]
pub mod memory;
pub mod rtdb;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::sync::batch::SyncBatch;
use crate::types::Category;

pub use error::StoreError;

/// Connection details for a user's document store, kept encrypted at rest.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCredential {
    pub database_url: String,
    pub auth_token: String,
}

impl std::fmt::Debug for StoreCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCredential")
            .field("database_url", &self.database_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn open(
        &self,
        username: &str,
        credential: &StoreCredential,
    ) -> Result<Arc<dyn StoreHandle>, StoreError>;

    /// Invalidate every open handle for `username`.
    fn invalidate(&self, username: &str);
}

#[async_trait]
pub trait StoreHandle: Send + Sync {
    /// True once the handle was released or invalidated.
    fn is_invalidated(&self) -> bool;

    /// Merge items and icon URLs for each category. Items are keyed by id,
    /// so rewriting an item overwrites it.
    async fn write_batches(&self, batches: &BTreeMap<Category, SyncBatch>)
        -> Result<(), StoreError>;

    /// Read the import queue for `category` without consuming it. `None`
    /// when nothing is queued.
    async fn pending_imports(&self, category: Category) -> Result<Option<Vec<String>>, StoreError>;

    /// Remove consumed fullnames from each category's import queue.
    async fn delete_imports(&self, imports: &BTreeMap<Category, Vec<String>>)
        -> Result<(), StoreError>;

    async fn release(&self) -> Result<(), StoreError>;
}

/// Liveness flags of handles opened per user.
#[derive(Debug, Default)]
pub(crate) struct OpenHandles {
    flags: Mutex<HashMap<String, Vec<Weak<AtomicBool>>>>,
}

impl OpenHandles {
    /// Register a new handle and return its invalidation flag.
    pub(crate) fn track(&self, username: &str) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        let mut flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = flags.entry(username.to_string()).or_default();
        entry.retain(|w| w.strong_count() > 0);
        entry.push(Arc::downgrade(&flag));
        flag
    }

    pub(crate) fn invalidate(&self, username: &str) {
        let mut flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handles) = flags.remove(username) {
            for flag in handles.iter().filter_map(Weak::upgrade) {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }
}
