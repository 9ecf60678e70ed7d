//! Incremental fetch of one listing.
//!
//! A listing is read newest-first with `before` set to the stored cursor, so
//! only items newer than the last sync come back. A small first page covers
//! the common case of a few new items. A refused cursor surfaces as a
//! [`PlatformError::Forbidden`] and is handled by the recovery path.

use crate::platform::{
    ListingPage, ListingQuery, PageToken, PlatformClient, PlatformError, Thing,
    CONTINUATION_PAGE_LIMIT, INCREMENTAL_PAGE_LIMIT, PROBE_LIMIT,
};
use crate::types::{Category, CursorSlot};

/// Result of syncing one listing.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotSync {
    /// New items arrived; the cursor moves to the newest of them.
    Advanced { cursor: String, things: Vec<Thing> },
    /// Nothing newer than the cursor. The cursor is replaced by whatever the
    /// listing currently starts with, which heals cursors pointing at items
    /// that have since left the listing.
    Reset { cursor: Option<String> },
}

pub async fn sync_slot(
    platform: &dyn PlatformClient,
    category: Category,
    slot: CursorSlot,
    cursor: Option<&str>,
) -> Result<SlotSync, PlatformError> {
    let query = ListingQuery::newer_than(cursor, INCREMENTAL_PAGE_LIMIT);
    let first = platform.get_listing(category, slot, &query).await?;

    let things = if first.is_finished() {
        first.items
    } else {
        fetch_remaining(platform, category, slot, first).await?
    };

    match things.first() {
        Some(newest) => Ok(SlotSync::Advanced {
            cursor: newest.fullname().to_string(),
            things,
        }),
        None => {
            let cursor = probe_latest(platform, category, slot).await?;
            tracing::debug!(%category, %slot, ?cursor, "No new items, cursor reset to listing head");
            Ok(SlotSync::Reset { cursor })
        }
    }
}

/// Fullname of the newest item in the listing, if any.
pub async fn probe_latest(
    platform: &dyn PlatformClient,
    category: Category,
    slot: CursorSlot,
) -> Result<Option<String>, PlatformError> {
    let page = platform
        .get_listing(category, slot, &ListingQuery::latest(PROBE_LIMIT))
        .await?;
    Ok(page.items.first().map(|t| t.fullname().to_string()))
}

/// Walk every remaining page after `first` and return all items newest-first.
async fn fetch_remaining(
    platform: &dyn PlatformClient,
    category: Category,
    slot: CursorSlot,
    first: ListingPage,
) -> Result<Vec<Thing>, PlatformError> {
    let mut things = first.items;
    // Pages reached through `before` are newer than everything so far.
    let mut newer_pages: Vec<Vec<Thing>> = Vec::new();
    let mut next = first.next;
    let mut pages = 1u32;

    while let Some(token) = next {
        let query = ListingQuery::continued(&token, CONTINUATION_PAGE_LIMIT);
        let page = platform.get_listing(category, slot, &query).await?;
        pages += 1;
        next = page.next;
        if page.items.is_empty() {
            break;
        }
        match token {
            PageToken::Newer(_) => newer_pages.push(page.items),
            PageToken::Older(_) => things.extend(page.items),
        }
    }
    tracing::debug!(%category, %slot, pages, "Fetched multi-page listing");

    let mut ordered: Vec<Thing> = newer_pages.into_iter().rev().flatten().collect();
    ordered.extend(things);
    Ok(ordered)
}
