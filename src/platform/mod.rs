//! Content platform access.
//!
//! The sync engine only talks to the platform through [`PlatformClient`], so
//! tests can substitute a scripted fake for the HTTP implementation.

pub mod error;
pub mod http;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{Category, CursorSlot, ItemKind};

pub use error::PlatformError;
pub use types::{ListingPage, ListingQuery, PageToken, SourceAbout, Thing};

/// Page size of the first, incremental request for a listing.
pub const INCREMENTAL_PAGE_LIMIT: u32 = 5;
/// Page size used when walking the rest of a listing.
pub const CONTINUATION_PAGE_LIMIT: u32 = 100;
/// Page size used to read just the newest item of a listing.
pub const PROBE_LIMIT: u32 = 1;
/// Upper bound on identifiers per batched lookup.
pub const MAX_IDS_PER_REQUEST: usize = 100;

/// An authenticated session for one user.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Fetch one page of the listing behind `category`/`slot`, newest first.
    async fn get_listing(
        &self,
        category: Category,
        slot: CursorSlot,
        query: &ListingQuery,
    ) -> Result<ListingPage, PlatformError>;

    /// Look up items by fullname. At most [`MAX_IDS_PER_REQUEST`] per call.
    async fn get_items_by_ids(&self, fullnames: &[String]) -> Result<Vec<Thing>, PlatformError>;

    /// Community records for `r/`-prefixed names. At most
    /// [`MAX_IDS_PER_REQUEST`] per call.
    async fn get_community_info(&self, names: &[String])
        -> Result<Vec<SourceAbout>, PlatformError>;

    /// Profile data for one `u/`-prefixed account.
    async fn get_user_about(&self, name: &str) -> Result<SourceAbout, PlatformError>;

    /// Requests left in the current rate-limit window, as last reported.
    fn ratelimit_remaining(&self) -> u32;

    /// Take an item out of the user's listing (unsave, delete, unvote, unhide).
    async fn remove_from_listing(
        &self,
        category: Category,
        kind: ItemKind,
        id: &str,
    ) -> Result<(), PlatformError>;

    /// Full body text of one comment.
    async fn get_comment_body(&self, id: &str) -> Result<String, PlatformError>;
}

/// Exchanges a stored refresh token for a live session.
#[async_trait]
pub trait PlatformConnector: Send + Sync {
    async fn connect(&self, refresh_token: &str) -> Result<Arc<dyn PlatformClient>, PlatformError>;
}
