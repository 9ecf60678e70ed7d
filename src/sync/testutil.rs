//! Scripted platform used by engine tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::orchestrator::{EngineDeps, SyncEngine};
use super::SyncPolicy;
use crate::crypto::SecretBox;
use crate::notify::email::testing::RecordingMailer;
use crate::notify::events::ConnectionId;
use crate::notify::{ConnectionRegistry, EventSink, Notifier, SyncEvent};
use crate::platform::{
    ListingPage, ListingQuery, PageToken, PlatformClient, PlatformConnector, PlatformError,
    SourceAbout, Thing,
};
use crate::state::{SqliteUserStore, UserRecord, UserStore};
use crate::store::memory::MemoryDocumentStore;
use crate::store::StoreCredential;
use crate::types::{Category, CursorSlot, ItemKind};

type SlotKey = (Category, CursorSlot);

/// Listing pages are served in the order they were pushed, per slot. An
/// exhausted queue serves an empty, finished page.
pub struct FakePlatform {
    pages: Mutex<HashMap<SlotKey, VecDeque<ListingPage>>>,
    forbidden: Mutex<HashMap<SlotKey, String>>,
    failing: Mutex<HashSet<SlotKey>>,
    items: Mutex<HashMap<String, Thing>>,
    communities: Mutex<HashMap<String, SourceAbout>>,
    users: Mutex<HashMap<String, SourceAbout>>,
    missing_users: Mutex<HashSet<String>>,
    ratelimit: AtomicU32,
    listing_calls: Mutex<Vec<(Category, CursorSlot, ListingQuery)>>,
    id_calls: Mutex<Vec<Vec<String>>>,
    community_calls: Mutex<Vec<Vec<String>>>,
    user_calls: Mutex<Vec<String>>,
    removed: Mutex<Vec<(Category, ItemKind, String)>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            pages: Mutex::default(),
            forbidden: Mutex::default(),
            failing: Mutex::default(),
            items: Mutex::default(),
            communities: Mutex::default(),
            users: Mutex::default(),
            missing_users: Mutex::default(),
            ratelimit: AtomicU32::new(600),
            listing_calls: Mutex::default(),
            id_calls: Mutex::default(),
            community_calls: Mutex::default(),
            user_calls: Mutex::default(),
            removed: Mutex::default(),
        }
    }

    pub fn push_page(
        &self,
        category: Category,
        slot: CursorSlot,
        items: Vec<Thing>,
        next: Option<PageToken>,
    ) {
        self.pages
            .lock()
            .unwrap()
            .entry((category, slot))
            .or_default()
            .push_back(ListingPage { items, next });
    }

    /// Respond 403 to any request on this slot carrying `before = cursor`.
    pub fn forbid_cursor(&self, category: Category, slot: CursorSlot, cursor: &str) {
        self.forbidden
            .lock()
            .unwrap()
            .insert((category, slot), cursor.to_string());
    }

    /// Respond 503 to every request on this slot.
    pub fn fail_slot(&self, category: Category, slot: CursorSlot) {
        self.failing.lock().unwrap().insert((category, slot));
    }

    pub fn add_item(&self, thing: Thing) {
        self.items
            .lock()
            .unwrap()
            .insert(thing.fullname().to_string(), thing);
    }

    pub fn add_community(&self, about: SourceAbout) {
        let name = about.display_name_prefixed.clone().unwrap_or_default();
        self.communities.lock().unwrap().insert(name, about);
    }

    pub fn add_user(&self, name: &str, about: SourceAbout) {
        self.users.lock().unwrap().insert(name.to_string(), about);
    }

    /// Profile lookups for `name` answer 404, as for a suspended account.
    pub fn fail_user(&self, name: &str) {
        self.missing_users.lock().unwrap().insert(name.to_string());
    }

    pub fn set_ratelimit(&self, remaining: u32) {
        self.ratelimit.store(remaining, Ordering::SeqCst);
    }

    pub fn listing_calls(&self) -> Vec<(Category, CursorSlot, ListingQuery)> {
        self.listing_calls.lock().unwrap().clone()
    }

    pub fn listing_calls_for(&self, category: Category) -> Vec<(CursorSlot, ListingQuery)> {
        self.listing_calls()
            .into_iter()
            .filter(|(c, _, _)| *c == category)
            .map(|(_, s, q)| (s, q))
            .collect()
    }

    pub fn id_calls(&self) -> Vec<Vec<String>> {
        self.id_calls.lock().unwrap().clone()
    }

    pub fn community_calls(&self) -> Vec<Vec<String>> {
        self.community_calls.lock().unwrap().clone()
    }

    pub fn user_calls(&self) -> Vec<String> {
        self.user_calls.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<(Category, ItemKind, String)> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn get_listing(
        &self,
        category: Category,
        slot: CursorSlot,
        query: &ListingQuery,
    ) -> Result<ListingPage, PlatformError> {
        self.listing_calls
            .lock()
            .unwrap()
            .push((category, slot, query.clone()));
        let path = format!("/user/alice/{category}/{slot}");
        if self.failing.lock().unwrap().contains(&(category, slot)) {
            return Err(PlatformError::HttpStatus { status: 503, path });
        }
        if let (Some(before), Some(refused)) = (
            query.before.as_deref(),
            self.forbidden.lock().unwrap().get(&(category, slot)),
        ) {
            if before == refused {
                return Err(PlatformError::Forbidden {
                    path,
                    before: before.to_string(),
                });
            }
        }
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get_mut(&(category, slot))
            .and_then(VecDeque::pop_front)
            .unwrap_or_default())
    }

    async fn get_items_by_ids(&self, fullnames: &[String]) -> Result<Vec<Thing>, PlatformError> {
        self.id_calls.lock().unwrap().push(fullnames.to_vec());
        let items = self.items.lock().unwrap();
        Ok(fullnames
            .iter()
            .filter_map(|n| items.get(n).cloned())
            .collect())
    }

    async fn get_community_info(
        &self,
        names: &[String],
    ) -> Result<Vec<SourceAbout>, PlatformError> {
        self.community_calls.lock().unwrap().push(names.to_vec());
        let communities = self.communities.lock().unwrap();
        Ok(names
            .iter()
            .filter_map(|n| communities.get(n).cloned())
            .collect())
    }

    async fn get_user_about(&self, name: &str) -> Result<SourceAbout, PlatformError> {
        self.user_calls.lock().unwrap().push(name.to_string());
        if self.missing_users.lock().unwrap().contains(name) {
            return Err(PlatformError::HttpStatus {
                status: 404,
                path: format!("/{name}/about"),
            });
        }
        Ok(self
            .users
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    fn ratelimit_remaining(&self) -> u32 {
        self.ratelimit.load(Ordering::SeqCst)
    }

    async fn remove_from_listing(
        &self,
        category: Category,
        kind: ItemKind,
        id: &str,
    ) -> Result<(), PlatformError> {
        if category == Category::Awarded {
            return Err(PlatformError::Unsupported("awards cannot be removed".into()));
        }
        self.removed
            .lock()
            .unwrap()
            .push((category, kind, id.to_string()));
        Ok(())
    }

    async fn get_comment_body(&self, id: &str) -> Result<String, PlatformError> {
        let fullname = ItemKind::Comment.fullname(id);
        match self.items.lock().unwrap().get(&fullname) {
            Some(thing) => Ok(thing.content().to_string()),
            None => Err(PlatformError::Malformed {
                path: "/api/info".into(),
                reason: format!("comment {id} not found"),
            }),
        }
    }
}

/// Hands out the same [`FakePlatform`] for every token.
pub struct FakeConnector {
    platform: Arc<FakePlatform>,
    connects: AtomicUsize,
    tokens: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new(platform: Arc<FakePlatform>) -> Self {
        Self {
            platform,
            connects: AtomicUsize::new(0),
            tokens: Mutex::default(),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformConnector for FakeConnector {
    async fn connect(&self, refresh_token: &str) -> Result<Arc<dyn PlatformClient>, PlatformError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().unwrap().push(refresh_token.to_string());
        Ok(self.platform.clone())
    }
}

/// Records emitted events instead of delivering them.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(ConnectionId, SyncEvent)>>,
}

impl RecordingSink {
    pub fn all(&self) -> Vec<(ConnectionId, SyncEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_for(&self, connection: &str) -> Vec<SyncEvent> {
        self.all()
            .into_iter()
            .filter(|(c, _)| c.0 == connection)
            .map(|(_, e)| e)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, connection: &ConnectionId, event: SyncEvent) {
        self.events
            .lock()
            .unwrap()
            .push((connection.clone(), event));
    }
}

/// A fully wired engine over in-memory collaborators.
pub struct Harness {
    pub engine: Arc<SyncEngine>,
    pub platform: Arc<FakePlatform>,
    pub connector: Arc<FakeConnector>,
    pub documents: Arc<MemoryDocumentStore>,
    pub users: Arc<SqliteUserStore>,
    pub mailer: Arc<RecordingMailer>,
    pub events: Arc<RecordingSink>,
    pub registry: Arc<ConnectionRegistry>,
    pub cipher: Arc<SecretBox>,
}

pub const TEST_TOKEN: &str = "refresh-token";

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(SyncPolicy::default())
    }

    pub fn with_policy(policy: SyncPolicy) -> Self {
        let platform = Arc::new(FakePlatform::new());
        let connector = Arc::new(FakeConnector::new(platform.clone()));
        let documents = Arc::new(MemoryDocumentStore::new());
        let users = Arc::new(SqliteUserStore::open_in_memory().unwrap());
        let mailer = Arc::new(RecordingMailer::default());
        let events = Arc::new(RecordingSink::default());
        let registry = Arc::new(ConnectionRegistry::new());
        let cipher = Arc::new(SecretBox::from_passphrase("test-key").unwrap());
        let notifier = Notifier::new(
            mailer.clone(),
            cipher.clone(),
            "mirror@example.com".to_string(),
            "https://mirror.example".to_string(),
        );
        let engine = Arc::new(SyncEngine::new(
            EngineDeps {
                users: users.clone(),
                documents: documents.clone(),
                platform: connector.clone(),
                cipher: cipher.clone(),
                notifier,
                registry: registry.clone(),
                events: events.clone(),
            },
            policy,
        ));
        Self {
            engine,
            platform,
            connector,
            documents,
            users,
            mailer,
            events,
            registry,
            cipher,
        }
    }

    /// Insert a registered, never-synced user with an email address.
    pub async fn register(&self, username: &str) -> UserRecord {
        let credential = StoreCredential {
            database_url: format!("mem://{username}"),
            auth_token: "store-token".to_string(),
        };
        let record = UserRecord::new(
            username.to_string(),
            self.cipher.encrypt(TEST_TOKEN).unwrap(),
            self.cipher
                .encrypt(&serde_json::to_string(&credential).unwrap())
                .unwrap(),
            Some(self.cipher.encrypt(&format!("{username}@example.com")).unwrap()),
            0,
        );
        self.users.insert_user(&record).await.unwrap();
        self.registry.add_user(username);
        record
    }

    pub async fn stored(&self, username: &str) -> UserRecord {
        self.users.get_user(username).await.unwrap().unwrap()
    }
}
