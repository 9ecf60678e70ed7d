//! Per-user sync: fetch every category, then commit what succeeded.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use futures_util::future::{join_all, try_join_all};

use super::batch::{ItemOrigin, SyncBatch};
use super::enrich::enrich_icons;
use super::error::SyncError;
use super::import::import_category;
use super::pipeline::{sync_slot, SlotSync};
use super::SyncPolicy;
use crate::crypto::SecretBox;
use crate::notify::email::{update_failed_body, UPDATE_FAILED_SUBJECT};
use crate::notify::{ConnectionRegistry, EventSink, Notifier, ProgressReporter};
use crate::platform::{PlatformClient, PlatformConnector};
use crate::state::{CategorySyncInfo, UserRecord, UserStore, UserUpdate};
use crate::store::{DocumentStore, StoreCredential, StoreHandle};
use crate::types::Category;

/// Collaborators the engine is built from.
pub struct EngineDeps {
    pub users: Arc<dyn UserStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub platform: Arc<dyn PlatformConnector>,
    pub cipher: Arc<SecretBox>,
    pub notifier: Notifier,
    pub registry: Arc<ConnectionRegistry>,
    pub events: Arc<dyn EventSink>,
}

pub struct SyncEngine {
    pub(super) users: Arc<dyn UserStore>,
    pub(super) documents: Arc<dyn DocumentStore>,
    pub(super) platform: Arc<dyn PlatformConnector>,
    pub(super) cipher: Arc<SecretBox>,
    pub(super) notifier: Notifier,
    pub(super) registry: Arc<ConnectionRegistry>,
    pub(super) events: Arc<dyn EventSink>,
    pub(super) policy: SyncPolicy,
}

/// A category that synced and is ready to commit.
#[derive(Debug)]
struct CategoryOutcome {
    category: Category,
    info: CategorySyncInfo,
    batch: SyncBatch,
    imported: Vec<String>,
}

#[derive(Debug)]
pub struct CategoryFailure {
    pub category: Category,
    pub error: SyncError,
}

#[derive(Debug)]
pub enum CommitStatus {
    Committed,
    /// Every category failed, so nothing was written.
    NothingToCommit,
    Failed(SyncError),
}

#[derive(Debug)]
pub struct SyncReport {
    pub synced: Vec<Category>,
    pub failures: Vec<CategoryFailure>,
    pub commit: CommitStatus,
    pub items_written: usize,
}

impl SyncReport {
    pub fn committed(&self) -> bool {
        matches!(self.commit, CommitStatus::Committed)
    }

    /// Every category synced and the commit went through.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.committed()
    }

    pub fn stale_cursor_failures(&self) -> Vec<Category> {
        self.failures
            .iter()
            .filter(|f| f.error.is_stale_cursor())
            .map(|f| f.category)
            .collect()
    }
}

impl SyncEngine {
    pub fn new(deps: EngineDeps, policy: SyncPolicy) -> Self {
        Self {
            users: deps.users,
            documents: deps.documents,
            platform: deps.platform,
            cipher: deps.cipher,
            notifier: deps.notifier,
            registry: deps.registry,
            events: deps.events,
            policy,
        }
    }

    pub(super) async fn connect(
        &self,
        user: &UserRecord,
    ) -> Result<Arc<dyn PlatformClient>, SyncError> {
        let sealed = user
            .platform_token_encrypted
            .as_deref()
            .ok_or_else(|| anyhow!("user {} has no platform credential", user.username))?;
        let token = self.cipher.decrypt(sealed)?;
        self.platform
            .connect(&token)
            .await
            .map_err(|e| SyncError::from_platform(None, e))
    }

    pub(super) async fn open_store(
        &self,
        user: &UserRecord,
    ) -> Result<Arc<dyn StoreHandle>, SyncError> {
        let sealed = user
            .store_credential_encrypted
            .as_deref()
            .ok_or_else(|| anyhow!("user {} has no store credential", user.username))?;
        let credential: StoreCredential = serde_json::from_str(&self.cipher.decrypt(sealed)?)
            .map_err(|e| anyhow::Error::new(e).context("malformed store credential"))?;
        self.documents
            .open(&user.username, &credential)
            .await
            .map_err(|e| SyncError::from_store(None, e))
    }

    fn progress_for(&self, username: &str) -> Option<ProgressReporter> {
        self.registry
            .lookup(username)
            .map(|connection| ProgressReporter::new(self.events.clone(), connection))
    }

    /// Sync every category of `user` and commit the ones that succeeded.
    ///
    /// `user` is updated in place with whatever was persisted. Errors
    /// returned here happened before any category ran; per-category and
    /// commit failures are reported in the [`SyncReport`].
    pub async fn sync_user(
        &self,
        user: &mut UserRecord,
        now: i64,
    ) -> Result<SyncReport, SyncError> {
        let platform = self.connect(user).await?;
        let store = self.open_store(user).await?;
        let progress = self.progress_for(&user.username);

        let results = join_all(Category::ALL.iter().map(|&category| {
            let info = user.sync_info.get(category);
            let platform = platform.as_ref();
            let store = store.as_ref();
            let progress = progress.as_ref();
            async move {
                let result = sync_category(platform, store, category, info, now).await;
                if let Some(progress) = progress {
                    progress.advance();
                }
                (category, result)
            }
        }))
        .await;

        let mut outcomes = Vec::new();
        let mut failures = Vec::new();
        for (category, result) in results {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => {
                    tracing::warn!(
                        username = %user.username,
                        %category,
                        error = %error,
                        "Category sync failed"
                    );
                    failures.push(CategoryFailure { category, error });
                }
            }
        }

        let synced: Vec<Category> = outcomes.iter().map(|o| o.category).collect();
        let items_written = outcomes.iter().map(|o| o.batch.items.len()).sum();

        if outcomes.is_empty() {
            release(store.as_ref(), &user.username).await;
            return Ok(SyncReport {
                synced,
                failures,
                commit: CommitStatus::NothingToCommit,
                items_written: 0,
            });
        }

        let commit = match self
            .commit(user, store.as_ref(), outcomes, progress.as_ref(), now)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    username = %user.username,
                    items = items_written,
                    categories = synced.len(),
                    "Sync committed"
                );
                CommitStatus::Committed
            }
            Err(error) => {
                tracing::error!(username = %user.username, error = %error, "Sync commit failed");
                if matches!(error, SyncError::Commit { .. }) {
                    self.notify_update_failed(user, now, &error).await;
                }
                CommitStatus::Failed(error)
            }
        };

        Ok(SyncReport {
            synced,
            failures,
            items_written: if matches!(commit, CommitStatus::Committed) {
                items_written
            } else {
                0
            },
            commit,
        })
    }

    async fn commit(
        &self,
        user: &mut UserRecord,
        store: &dyn StoreHandle,
        outcomes: Vec<CategoryOutcome>,
        progress: Option<&ProgressReporter>,
        now: i64,
    ) -> Result<(), SyncError> {
        let mut sync_info = user.sync_info.clone();
        let mut batches = BTreeMap::new();
        let mut imports = BTreeMap::new();
        for outcome in outcomes {
            sync_info.set(outcome.category, outcome.info);
            if !outcome.imported.is_empty() {
                imports.insert(outcome.category, outcome.imported);
            }
            batches.insert(outcome.category, outcome.batch);
        }

        let written = match store.write_batches(&batches).await {
            Ok(()) => store.delete_imports(&imports).await,
            Err(e) => Err(e),
        };
        release(store, &user.username).await;
        if let Err(e) = written {
            if e.is_invalidated() {
                return Err(SyncError::StoreUnavailable { category: None });
            }
            return Err(SyncError::Commit {
                source: Box::new(e),
            });
        }
        if let Some(progress) = progress {
            progress.advance();
        }

        self.users
            .update_user(
                &user.username,
                &UserUpdate::default()
                    .sync_info(sync_info.clone())
                    .last_updated(now),
            )
            .await
            .map_err(|e| SyncError::Commit {
                source: Box::new(e),
            })?;
        user.sync_info = sync_info;
        user.last_updated_epoch = Some(now);
        if let Some(progress) = progress {
            progress.advance();
        }
        Ok(())
    }

    async fn notify_update_failed(&self, user: &mut UserRecord, now: i64, error: &SyncError) {
        let last = user
            .email_notif
            .last_update_failed_notif_epoch
            .unwrap_or(0);
        if now - last < self.policy.update_failed_notice_secs {
            tracing::debug!(username = %user.username, "Update failure notice throttled");
            return;
        }
        self.notifier
            .send_notice(user, UPDATE_FAILED_SUBJECT, &update_failed_body(&error.to_string()))
            .await;
        user.email_notif.last_update_failed_notif_epoch = Some(now);
        if let Err(e) = self
            .users
            .update_user(
                &user.username,
                &UserUpdate::default().email_notif(user.email_notif),
            )
            .await
        {
            tracing::warn!(username = %user.username, error = %e, "Failed to record notice time");
        }
    }
}

async fn release(store: &dyn StoreHandle, username: &str) {
    if let Err(e) = store.release().await {
        tracing::warn!(username, error = %e, "Failed to release document store handle");
    }
}

fn ensure_store(store: &dyn StoreHandle, category: Category) -> Result<(), SyncError> {
    if store.is_invalidated() {
        return Err(SyncError::StoreUnavailable {
            category: Some(category),
        });
    }
    Ok(())
}

/// Fetch, import and enrich one category. Nothing is written here.
async fn sync_category(
    platform: &dyn PlatformClient,
    store: &dyn StoreHandle,
    category: Category,
    mut info: CategorySyncInfo,
    now: i64,
) -> Result<CategoryOutcome, SyncError> {
    ensure_store(store, category)?;

    let slots = try_join_all(category.slots().iter().map(|&slot| {
        let cursor = info.cursor(slot).map(str::to_owned);
        async move {
            sync_slot(platform, category, slot, cursor.as_deref())
                .await
                .map(|result| (slot, result))
        }
    }))
    .await
    .map_err(|e| SyncError::from_platform(Some(category), e))?;

    let mut batch = SyncBatch::default();
    for (slot, result) in slots {
        match result {
            SlotSync::Advanced { cursor, things } => {
                info.set_cursor(slot, Some(cursor));
                batch.extend(&things, ItemOrigin::Incremental);
                info.latest_new_data_epoch = Some(now);
            }
            SlotSync::Reset { cursor } => info.set_cursor(slot, cursor),
        }
    }

    ensure_store(store, category)?;
    let imported = match import_category(platform, store, category).await? {
        Some(set) => {
            batch.extend(&set.things, ItemOrigin::Imported);
            info.latest_new_data_epoch = Some(now);
            set.fullnames
        }
        None => Vec::new(),
    };

    ensure_store(store, category)?;
    enrich_icons(platform, category, &mut batch).await;
    ensure_store(store, category)?;

    tracing::debug!(
        %category,
        new = batch.count(ItemOrigin::Incremental),
        imported = batch.count(ItemOrigin::Imported),
        "Category fetched"
    );
    Ok(CategoryOutcome {
        category,
        info,
        batch,
        imported,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::email::UPDATE_FAILED_SUBJECT;
    use crate::notify::events::ConnectionId;
    use crate::notify::SyncEvent;
    use crate::platform::PageToken;
    use crate::sync::batch::fixtures::{comment, post};
    use crate::sync::testutil::Harness;
    use crate::types::CursorSlot;

    const NOW: i64 = 1_700_000_000;

    #[tokio::test]
    async fn test_first_sync_populates_store_and_cursors() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        h.platform.push_page(
            Category::Saved,
            CursorSlot::Mixed,
            vec![post("b", "r/rust", 2.0), comment("a", "r/rust", 1.0)],
            None,
        );
        h.platform.push_page(
            Category::Created,
            CursorSlot::Comments,
            vec![comment("c", "u/alice", 3.0)],
            None,
        );

        let report = h.engine.sync_user(&mut user, NOW).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.items_written, 3);

        let saved = h.documents.items("alice", Category::Saved);
        assert_eq!(saved.len(), 2);
        assert_eq!(saved["a"].author, "u/bob");
        assert_eq!(h.documents.items("alice", Category::Created).len(), 1);

        let row = h.stored("alice").await;
        assert_eq!(row.last_updated_epoch, Some(NOW));
        let saved_info = row.sync_info.get(Category::Saved);
        assert_eq!(saved_info.cursor(CursorSlot::Mixed), Some("t3_b"));
        assert_eq!(saved_info.latest_new_data_epoch, Some(NOW));
        let created = row.sync_info.get(Category::Created);
        assert_eq!(created.cursor(CursorSlot::Comments), Some("t1_c"));
        assert_eq!(created.cursor(CursorSlot::Posts), None);
        assert_eq!(row.sync_info.get(Category::Hidden).latest_new_data_epoch, None);
        assert_eq!(user, row);
    }

    #[tokio::test]
    async fn test_incremental_sync_sends_cursor_as_before() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        user.sync_info
            .get_mut(Category::Upvoted)
            .set_cursor(CursorSlot::Posts, Some("t3_old".into()));
        h.platform.push_page(
            Category::Upvoted,
            CursorSlot::Posts,
            vec![post("new", "r/a", 5.0)],
            None,
        );

        h.engine.sync_user(&mut user, NOW).await.unwrap();

        let calls = h.platform.listing_calls_for(Category::Upvoted);
        assert_eq!(calls[0].1.before.as_deref(), Some("t3_old"));
        assert_eq!(calls[0].1.limit, 5);
        assert_eq!(
            user.sync_info.get(Category::Upvoted).cursor(CursorSlot::Posts),
            Some("t3_new")
        );
    }

    #[tokio::test]
    async fn test_resync_with_nothing_new_touches_only_cursor() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        user.sync_info
            .get_mut(Category::Hidden)
            .set_cursor(CursorSlot::Posts, Some("t3_h".into()));
        user.sync_info.get_mut(Category::Hidden).latest_new_data_epoch = Some(100);
        h.platform
            .push_page(Category::Hidden, CursorSlot::Posts, vec![], None);
        h.platform.push_page(
            Category::Hidden,
            CursorSlot::Posts,
            vec![post("h", "r/a", 1.0)],
            Some(PageToken::Older("t3_h".into())),
        );

        h.engine.sync_user(&mut user, NOW).await.unwrap();

        let hidden = user.sync_info.get(Category::Hidden);
        assert_eq!(hidden.cursor(CursorSlot::Posts), Some("t3_h"));
        assert_eq!(hidden.latest_new_data_epoch, Some(100));
        assert!(h.documents.items("alice", Category::Hidden).is_empty());
    }

    #[tokio::test]
    async fn test_failed_category_keeps_old_cursor() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        user.sync_info
            .get_mut(Category::Downvoted)
            .set_cursor(CursorSlot::Posts, Some("t3_keep".into()));
        h.platform.fail_slot(Category::Downvoted, CursorSlot::Posts);
        h.platform.push_page(
            Category::Saved,
            CursorSlot::Mixed,
            vec![post("s", "r/a", 1.0)],
            None,
        );

        let report = h.engine.sync_user(&mut user, NOW).await.unwrap();
        assert!(report.committed());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].category, Category::Downvoted);
        assert!(!report.is_clean());

        let row = h.stored("alice").await;
        assert_eq!(
            row.sync_info.get(Category::Downvoted).cursor(CursorSlot::Posts),
            Some("t3_keep")
        );
        assert_eq!(
            row.sync_info.get(Category::Saved).cursor(CursorSlot::Mixed),
            Some("t3_s")
        );
    }

    #[tokio::test]
    async fn test_all_categories_failing_writes_nothing() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        for category in Category::ALL {
            for slot in category.slots() {
                h.platform.fail_slot(category, *slot);
            }
        }

        let report = h.engine.sync_user(&mut user, NOW).await.unwrap();
        assert!(matches!(report.commit, CommitStatus::NothingToCommit));
        assert_eq!(report.failures.len(), 6);
        assert_eq!(h.documents.write_count(), 0);
        assert_eq!(h.documents.release_count(), 1);
        assert_eq!(h.stored("alice").await.last_updated_epoch, None);
    }

    #[tokio::test]
    async fn test_imports_consumed_and_stamped() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        h.documents
            .queue_imports("alice", Category::Saved, &["t3_old1", "t1_old2"]);
        h.platform.add_item(post("old1", "r/a", 1.0));
        h.platform.add_item(comment("old2", "r/a", 1.0));

        h.engine.sync_user(&mut user, NOW).await.unwrap();

        let saved = h.documents.items("alice", Category::Saved);
        assert_eq!(saved.len(), 2);
        assert!(h.documents.queued_imports("alice", Category::Saved).is_empty());
        let info = user.sync_info.get(Category::Saved);
        assert_eq!(info.latest_new_data_epoch, Some(NOW));
        // Imports never move the cursor.
        assert_eq!(info.cursor(CursorSlot::Mixed), None);
    }

    #[tokio::test]
    async fn test_write_failure_persists_nothing_and_notifies() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        h.documents.set_fail_writes(true);
        h.documents
            .queue_imports("alice", Category::Hidden, &["t3_q"]);
        h.platform.push_page(
            Category::Saved,
            CursorSlot::Mixed,
            vec![post("s", "r/a", 1.0)],
            None,
        );

        let report = h.engine.sync_user(&mut user, NOW).await.unwrap();
        assert!(matches!(report.commit, CommitStatus::Failed(SyncError::Commit { .. })));
        assert_eq!(report.items_written, 0);

        let row = h.stored("alice").await;
        assert_eq!(row.last_updated_epoch, None);
        assert_eq!(row.sync_info.get(Category::Saved).cursor(CursorSlot::Mixed), None);
        assert_eq!(h.documents.queued_imports("alice", Category::Hidden).len(), 1);
        assert_eq!(h.documents.release_count(), 1);
        assert_eq!(h.mailer.subjects(), vec![UPDATE_FAILED_SUBJECT.to_string()]);
        assert_eq!(
            row.email_notif.last_update_failed_notif_epoch,
            Some(NOW)
        );
    }

    #[tokio::test]
    async fn test_failure_notice_throttled() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        h.documents.set_fail_writes(true);

        h.engine.sync_user(&mut user, NOW).await.unwrap();
        h.engine.sync_user(&mut user, NOW + 60).await.unwrap();
        assert_eq!(h.mailer.subjects().len(), 1);

        let month_later = NOW + h.engine.policy.update_failed_notice_secs;
        h.engine.sync_user(&mut user, month_later).await.unwrap();
        assert_eq!(h.mailer.subjects().len(), 2);
    }

    #[tokio::test]
    async fn test_purge_mid_sync_stops_category() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        h.documents.invalidate_on_open(true);
        let before = h.stored("alice").await;

        let report = h.engine.sync_user(&mut user, NOW).await.unwrap();
        assert!(matches!(report.commit, CommitStatus::NothingToCommit));
        assert!(report
            .failures
            .iter()
            .all(|f| matches!(f.error, SyncError::StoreUnavailable { .. })));
        assert!(h.mailer.subjects().is_empty());
        assert_eq!(h.documents.write_count(), 0);
        assert!(h.platform.listing_calls().is_empty());
        assert_eq!(h.stored("alice").await, before);
    }

    #[tokio::test]
    async fn test_progress_events_for_connected_user() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        h.registry.register("alice", ConnectionId("c1".into()));

        h.engine.sync_user(&mut user, NOW).await.unwrap();

        let steps: Vec<u32> = h
            .events
            .events_for("c1")
            .into_iter()
            .filter_map(|e| match e {
                SyncEvent::UpdateProgress { step, total } => {
                    assert_eq!(total, 8);
                    Some(step)
                }
                _ => None,
            })
            .collect();
        assert_eq!(steps, (1..=8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_no_events_without_connection() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        h.engine.sync_user(&mut user, NOW).await.unwrap();
        assert!(h.events.all().is_empty());
    }

    #[tokio::test]
    async fn test_icons_written_with_items() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        h.platform.push_page(
            Category::Saved,
            CursorSlot::Mixed,
            vec![post("a", "r/nowhere", 1.0)],
            None,
        );
        h.engine.sync_user(&mut user, NOW).await.unwrap();
        let icons = h.documents.icons("alice", Category::Saved);
        assert_eq!(icons.get("r/nowhere").map(String::as_str), Some("#"));
    }

    #[tokio::test]
    async fn test_cursor_only_moves_forward() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        h.platform.push_page(
            Category::Upvoted,
            CursorSlot::Posts,
            vec![post("b", "r/a", 2.0), post("a", "r/a", 1.0)],
            None,
        );
        h.engine.sync_user(&mut user, NOW).await.unwrap();

        h.platform.push_page(
            Category::Upvoted,
            CursorSlot::Posts,
            vec![post("d", "r/a", 4.0), post("c", "r/a", 3.0)],
            None,
        );
        h.engine.sync_user(&mut user, NOW + 60).await.unwrap();

        // Nothing new: the head probe answers with the current cursor item.
        h.platform
            .push_page(Category::Upvoted, CursorSlot::Posts, vec![], None);
        h.platform.push_page(
            Category::Upvoted,
            CursorSlot::Posts,
            vec![post("d", "r/a", 4.0)],
            None,
        );
        h.engine.sync_user(&mut user, NOW + 120).await.unwrap();

        let befores: Vec<Option<String>> = h
            .platform
            .listing_calls_for(Category::Upvoted)
            .into_iter()
            .map(|(_, q)| q.before)
            .collect();
        assert_eq!(befores[0], None);
        assert_eq!(befores[1].as_deref(), Some("t3_b"));
        assert_eq!(befores[2].as_deref(), Some("t3_d"));
        let row = h.stored("alice").await;
        assert_eq!(
            row.sync_info.get(Category::Upvoted).cursor(CursorSlot::Posts),
            Some("t3_d")
        );
        assert_eq!(h.documents.items("alice", Category::Upvoted).len(), 4);
    }

    #[tokio::test]
    async fn test_failed_icon_lookup_keeps_category() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        h.platform.fail_user("u/suspended");
        h.platform.push_page(
            Category::Saved,
            CursorSlot::Mixed,
            vec![post("new", "r/rust", 2.0), comment("c", "u/suspended", 1.0)],
            None,
        );

        let report = h.engine.sync_user(&mut user, NOW).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(h.documents.items("alice", Category::Saved).len(), 2);
        let row = h.stored("alice").await;
        assert_eq!(
            row.sync_info.get(Category::Saved).cursor(CursorSlot::Mixed),
            Some("t3_new")
        );
        let icons = h.documents.icons("alice", Category::Saved);
        assert!(!icons.contains_key("u/suspended"));
        assert_eq!(icons.get("r/rust").map(String::as_str), Some("#"));
    }
}
