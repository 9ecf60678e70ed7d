//! Backfill of items queued in the user's document store.

use futures_util::future::try_join_all;

use super::batch::ImportSet;
use super::error::SyncError;
use crate::platform::{PlatformClient, MAX_IDS_PER_REQUEST};
use crate::store::StoreHandle;
use crate::types::Category;

/// Resolve the queued fullnames for `category`. The queue is only read here;
/// entries are deleted after the batch has been written.
pub async fn import_category(
    platform: &dyn PlatformClient,
    store: &dyn StoreHandle,
    category: Category,
) -> Result<Option<ImportSet>, SyncError> {
    if !category.accepts_imports() {
        return Ok(None);
    }
    let queued = store
        .pending_imports(category)
        .await
        .map_err(|e| SyncError::from_store(Some(category), e))?;
    let Some(fullnames) = queued.filter(|q| !q.is_empty()) else {
        return Ok(None);
    };

    let pages = try_join_all(
        fullnames
            .chunks(MAX_IDS_PER_REQUEST)
            .map(|chunk| platform.get_items_by_ids(chunk)),
    )
    .await
    .map_err(|e| SyncError::from_platform(Some(category), e))?;
    let things: Vec<_> = pages.into_iter().flatten().collect();

    tracing::info!(
        %category,
        queued = fullnames.len(),
        found = things.len(),
        "Imported queued items"
    );
    Ok(Some(ImportSet { fullnames, things }))
}
