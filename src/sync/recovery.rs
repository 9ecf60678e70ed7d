//! Repair of cursors the platform refuses.
//!
//! When a listing request carrying `before` is rejected, the cursor item was
//! most likely deleted or made private. Each affected slot is re-pointed at
//! the newest item of its listing and the result persisted straight away, so
//! the next cycle syncs from there. Items between the old and new cursor are
//! not recovered.

use futures_util::future::try_join_all;

use super::error::SyncError;
use super::orchestrator::SyncEngine;
use super::pipeline::probe_latest;
use crate::platform::PlatformClient;
use crate::state::{CategorySyncInfo, UserRecord, UserUpdate};
use crate::types::Category;

impl SyncEngine {
    /// Probe-repair the cursors of `categories` and persist them.
    ///
    /// A category whose probe fails keeps its old cursor; the failure is
    /// logged and the next cycle will hit the same rejection.
    pub async fn repair_cursors(
        &self,
        user: &mut UserRecord,
        categories: &[Category],
    ) -> Result<Vec<Category>, SyncError> {
        if categories.is_empty() {
            return Ok(Vec::new());
        }
        let platform = self.connect(user).await?;

        let mut sync_info = user.sync_info.clone();
        let mut repaired = Vec::new();
        for &category in categories {
            let info = sync_info.get_mut(category);
            match repair_category(platform.as_ref(), category, info).await {
                Ok(()) => {
                    tracing::warn!(
                        username = %user.username,
                        %category,
                        "Stale cursor replaced with listing head"
                    );
                    repaired.push(category);
                }
                Err(e) => tracing::error!(
                    username = %user.username,
                    %category,
                    error = %e,
                    "Cursor repair failed"
                ),
            }
        }
        if repaired.is_empty() {
            return Ok(repaired);
        }

        self.users
            .update_user(&user.username, &UserUpdate::default().sync_info(sync_info.clone()))
            .await?;
        user.sync_info = sync_info;
        Ok(repaired)
    }
}

/// Probe every slot of the category concurrently; all or nothing.
async fn repair_category(
    platform: &dyn PlatformClient,
    category: Category,
    info: &mut CategorySyncInfo,
) -> Result<(), SyncError> {
    let heads = try_join_all(
        category
            .slots()
            .iter()
            .map(|&slot| async move { probe_latest(platform, category, slot).await.map(|h| (slot, h)) }),
    )
    .await
    .map_err(|e| SyncError::from_platform(Some(category), e))?;
    for (slot, head) in heads {
        info.set_cursor(slot, head);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::batch::fixtures::{comment, post};
    use crate::sync::testutil::Harness;
    use crate::types::CursorSlot;

    #[tokio::test]
    async fn test_stale_cursor_repaired_and_persisted() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        user.sync_info
            .get_mut(Category::Saved)
            .set_cursor(CursorSlot::Mixed, Some("t3_gone".into()));
        h.platform
            .forbid_cursor(Category::Saved, CursorSlot::Mixed, "t3_gone");

        let report = h.engine.sync_user(&mut user, 1_000).await.unwrap();
        assert_eq!(report.stale_cursor_failures(), vec![Category::Saved]);
        // Other categories still committed with the stale cursor untouched.
        assert_eq!(
            h.stored("alice").await.sync_info.get(Category::Saved).cursor(CursorSlot::Mixed),
            Some("t3_gone")
        );

        h.platform.push_page(
            Category::Saved,
            CursorSlot::Mixed,
            vec![post("head", "r/a", 9.0)],
            None,
        );
        let repaired = h
            .engine
            .repair_cursors(&mut user, &report.stale_cursor_failures())
            .await
            .unwrap();
        assert_eq!(repaired, vec![Category::Saved]);

        let row = h.stored("alice").await;
        assert_eq!(
            row.sync_info.get(Category::Saved).cursor(CursorSlot::Mixed),
            Some("t3_head")
        );
        let probe = h.platform.listing_calls_for(Category::Saved);
        let last = &probe.last().unwrap().1;
        assert!(last.before.is_none());
        assert_eq!(last.limit, 1);
    }

    #[tokio::test]
    async fn test_created_repairs_both_slots() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        h.platform.push_page(
            Category::Created,
            CursorSlot::Posts,
            vec![post("p", "u/alice", 2.0)],
            None,
        );
        h.platform.push_page(
            Category::Created,
            CursorSlot::Comments,
            vec![comment("c", "r/a", 3.0)],
            None,
        );

        h.engine
            .repair_cursors(&mut user, &[Category::Created])
            .await
            .unwrap();
        let created = user.sync_info.get(Category::Created);
        assert_eq!(created.cursor(CursorSlot::Posts), Some("t3_p"));
        assert_eq!(created.cursor(CursorSlot::Comments), Some("t1_c"));
    }

    #[tokio::test]
    async fn test_failed_probe_leaves_cursor() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        user.sync_info
            .get_mut(Category::Hidden)
            .set_cursor(CursorSlot::Posts, Some("t3_keep".into()));
        h.platform.fail_slot(Category::Hidden, CursorSlot::Posts);

        let repaired = h
            .engine
            .repair_cursors(&mut user, &[Category::Hidden])
            .await
            .unwrap();
        assert!(repaired.is_empty());
        assert_eq!(
            user.sync_info.get(Category::Hidden).cursor(CursorSlot::Posts),
            Some("t3_keep")
        );
    }

    #[tokio::test]
    async fn test_nothing_to_repair_skips_connect() {
        let h = Harness::new();
        let mut user = h.register("alice").await;
        h.engine.repair_cursors(&mut user, &[]).await.unwrap();
        assert_eq!(h.connector.connects(), 0);
    }
}
