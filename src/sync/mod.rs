//! The sync engine.
//!
//! A sync of one user fetches every category concurrently, gathers the new
//! items into per-category batches, and commits them in one step: the
//! document store first, then the cursors in the relational store. A
//! category that fails keeps its old cursors and is retried next cycle.

pub mod account;
pub mod batch;
pub mod enrich;
pub mod error;
pub mod import;
pub mod orchestrator;
pub mod pipeline;
pub mod recovery;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testutil;

pub use orchestrator::{CommitStatus, EngineDeps, SyncEngine, SyncReport};
pub use scheduler::{sync_once, Scheduler};

/// Timing rules for syncing and notices, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Minimum gap between two syncs of the same user.
    pub min_resync_secs: i64,
    /// Idle time after which a user stops being synced.
    pub inactive_after_secs: i64,
    /// Minimum gap between inactivity notices.
    pub inactive_notice_secs: i64,
    /// Minimum gap between update-failure notices.
    pub update_failed_notice_secs: i64,
}

const DAY_SECS: i64 = 24 * 60 * 60;

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            min_resync_secs: 30,
            inactive_after_secs: 180 * DAY_SECS,
            inactive_notice_secs: 90 * DAY_SECS,
            update_failed_notice_secs: 30 * DAY_SECS,
        }
    }
}
