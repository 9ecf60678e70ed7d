//! In-process document store for engine tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{DocumentStore, OpenHandles, StoreCredential, StoreError, StoreHandle};
use crate::sync::batch::{MergedItem, SyncBatch};
use crate::types::Category;

type Key = (String, Category);

#[derive(Debug, Default)]
struct Data {
    items: HashMap<Key, BTreeMap<String, MergedItem>>,
    icons: HashMap<Key, BTreeMap<String, String>>,
    imports: HashMap<Key, BTreeSet<String>>,
}

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    handles: OpenHandles,
    data: Arc<Mutex<Data>>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    opens: AtomicUsize,
    invalidate_on_open: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_imports(&self, username: &str, category: Category, fullnames: &[&str]) {
        let mut data = self.data.lock().unwrap();
        data.imports
            .entry((username.to_string(), category))
            .or_default()
            .extend(fullnames.iter().map(|s| s.to_string()));
    }

    pub fn items(&self, username: &str, category: Category) -> BTreeMap<String, MergedItem> {
        let data = self.data.lock().unwrap();
        data.items
            .get(&(username.to_string(), category))
            .cloned()
            .unwrap_or_default()
    }

    pub fn icons(&self, username: &str, category: Category) -> BTreeMap<String, String> {
        let data = self.data.lock().unwrap();
        data.icons
            .get(&(username.to_string(), category))
            .cloned()
            .unwrap_or_default()
    }

    pub fn queued_imports(&self, username: &str, category: Category) -> BTreeSet<String> {
        let data = self.data.lock().unwrap();
        data.imports
            .get(&(username.to_string(), category))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Simulate a purge landing right after each handle is opened.
    pub fn invalidate_on_open(&self, enabled: bool) {
        self.invalidate_on_open.store(enabled, Ordering::SeqCst);
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn open(
        &self,
        username: &str,
        _credential: &StoreCredential,
    ) -> Result<Arc<dyn StoreHandle>, StoreError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(MemoryHandle {
            username: username.to_string(),
            invalidated: self.handles.track(username),
            data: self.data.clone(),
            fail_writes: self.fail_writes.clone(),
            writes: self.writes.clone(),
            releases: self.releases.clone(),
        });
        if self.invalidate_on_open.load(Ordering::SeqCst) {
            self.handles.invalidate(username);
        }
        Ok(handle)
    }

    fn invalidate(&self, username: &str) {
        self.handles.invalidate(username);
    }
}

struct MemoryHandle {
    username: String,
    invalidated: Arc<AtomicBool>,
    data: Arc<Mutex<Data>>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl MemoryHandle {
    fn ensure_live(&self) -> Result<(), StoreError> {
        if self.is_invalidated() {
            return Err(StoreError::Invalidated {
                username: self.username.clone(),
            });
        }
        Ok(())
    }

    fn key(&self, category: Category) -> Key {
        (self.username.clone(), category)
    }
}

#[async_trait]
impl StoreHandle for MemoryHandle {
    fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }

    async fn write_batches(
        &self,
        batches: &BTreeMap<Category, SyncBatch>,
    ) -> Result<(), StoreError> {
        self.ensure_live()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("write refused".to_string()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock().unwrap();
        for (category, batch) in batches {
            data.items
                .entry(self.key(*category))
                .or_default()
                .extend(batch.items.clone());
            data.icons
                .entry(self.key(*category))
                .or_default()
                .extend(batch.icon_urls.clone());
        }
        Ok(())
    }

    async fn pending_imports(&self, category: Category) -> Result<Option<Vec<String>>, StoreError> {
        self.ensure_live()?;
        let data = self.data.lock().unwrap();
        Ok(data
            .imports
            .get(&self.key(category))
            .filter(|queued| !queued.is_empty())
            .map(|queued| queued.iter().cloned().collect()))
    }

    async fn delete_imports(
        &self,
        imports: &BTreeMap<Category, Vec<String>>,
    ) -> Result<(), StoreError> {
        self.ensure_live()?;
        let mut data = self.data.lock().unwrap();
        for (category, fullnames) in imports {
            if let Some(queued) = data.imports.get_mut(&self.key(*category)) {
                for name in fullnames {
                    queued.remove(name);
                }
            }
        }
        Ok(())
    }

    async fn release(&self) -> Result<(), StoreError> {
        self.invalidated.store(true, Ordering::SeqCst);
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
