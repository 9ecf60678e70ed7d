//! Types for the per-user relational record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Category, CursorSlot};

/// Sync progress of one category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySyncInfo {
    /// Fullname of the newest item seen, per listing.
    #[serde(default)]
    pub cursors: BTreeMap<CursorSlot, String>,
    /// When this category last gained items.
    #[serde(default)]
    pub latest_new_data_epoch: Option<i64>,
}

impl CategorySyncInfo {
    pub fn cursor(&self, slot: CursorSlot) -> Option<&str> {
        self.cursors.get(&slot).map(String::as_str)
    }

    pub fn set_cursor(&mut self, slot: CursorSlot, cursor: Option<String>) {
        match cursor {
            Some(c) => {
                self.cursors.insert(slot, c);
            }
            None => {
                self.cursors.remove(&slot);
            }
        }
    }
}

/// Sync progress of every category, stored as one JSON column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncInfo(BTreeMap<Category, CategorySyncInfo>);

impl SyncInfo {
    /// Empty progress for all six categories.
    pub fn fresh() -> Self {
        Self(
            Category::ALL
                .iter()
                .map(|c| (*c, CategorySyncInfo::default()))
                .collect(),
        )
    }

    pub fn get(&self, category: Category) -> CategorySyncInfo {
        self.0.get(&category).cloned().unwrap_or_default()
    }

    pub fn get_mut(&mut self, category: Category) -> &mut CategorySyncInfo {
        self.0.entry(category).or_default()
    }

    pub fn set(&mut self, category: Category, info: CategorySyncInfo) {
        self.0.insert(category, info);
    }

    /// Categories whose new-data timestamp moved forward relative to `before`.
    pub fn categories_with_new_data(&self, before: &SyncInfo) -> Vec<Category> {
        Category::ALL
            .iter()
            .copied()
            .filter(|c| {
                self.get(*c).latest_new_data_epoch > before.get(*c).latest_new_data_epoch
            })
            .collect()
    }
}

/// Timestamps of the last notices sent, used for throttling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailNotif {
    #[serde(default)]
    pub last_inactive_notif_epoch: Option<i64>,
    #[serde(default)]
    pub last_update_failed_notif_epoch: Option<i64>,
}

/// One row of the `users` table. Secrets are stored encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub platform_token_encrypted: Option<String>,
    pub store_credential_encrypted: Option<String>,
    pub email_encrypted: Option<String>,
    pub sync_info: SyncInfo,
    pub last_updated_epoch: Option<i64>,
    pub last_active_epoch: Option<i64>,
    pub email_notif: EmailNotif,
}

impl UserRecord {
    /// A newly registered user: fresh progress, never synced.
    pub fn new(
        username: String,
        platform_token_encrypted: String,
        store_credential_encrypted: String,
        email_encrypted: Option<String>,
        now: i64,
    ) -> Self {
        Self {
            username,
            platform_token_encrypted: Some(platform_token_encrypted),
            store_credential_encrypted: Some(store_credential_encrypted),
            email_encrypted,
            sync_info: SyncInfo::fresh(),
            last_updated_epoch: None,
            last_active_epoch: Some(now),
            email_notif: EmailNotif::default(),
        }
    }

    /// Purged users keep their row with every field cleared.
    pub fn is_purged(&self) -> bool {
        self.platform_token_encrypted.is_none()
    }
}

/// Partial update of a user row. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub platform_token_encrypted: Option<String>,
    pub store_credential_encrypted: Option<String>,
    pub email_encrypted: Option<String>,
    pub sync_info: Option<SyncInfo>,
    pub last_updated_epoch: Option<i64>,
    pub last_active_epoch: Option<i64>,
    pub email_notif: Option<EmailNotif>,
}

impl UserUpdate {
    pub fn sync_info(mut self, info: SyncInfo) -> Self {
        self.sync_info = Some(info);
        self
    }

    pub fn last_updated(mut self, epoch: i64) -> Self {
        self.last_updated_epoch = Some(epoch);
        self
    }

    pub fn last_active(mut self, epoch: i64) -> Self {
        self.last_active_epoch = Some(epoch);
        self
    }

    pub fn email_notif(mut self, notif: EmailNotif) -> Self {
        self.email_notif = Some(notif);
        self
    }

    pub fn platform_token(mut self, encrypted: String) -> Self {
        self.platform_token_encrypted = Some(encrypted);
        self
    }
}

/// Counters recorded for one sweep over all users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepRunStats {
    pub users_seen: u64,
    pub users_synced: u64,
    pub users_failed: u64,
    pub users_skipped: u64,
    pub interrupted: bool,
}

/// Summary shown by the `status` command.
#[derive(Debug, Clone)]
pub struct StateSummary {
    pub total_users: u64,
    pub active_users: u64,
    pub onboarded_users: u64,
    pub last_sweep_started: Option<DateTime<Utc>>,
    pub last_sweep_completed: Option<DateTime<Utc>>,
    pub last_sweep_stats: Option<SweepRunStats>,
}
