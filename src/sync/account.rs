//! Account-level operations outside the periodic sweep.

use super::error::SyncError;
use super::orchestrator::SyncEngine;
use super::pipeline::probe_latest;
use crate::state::{UserRecord, UserUpdate};
use crate::store::StoreCredential;
use crate::types::{Category, ItemKind};

/// Credentials supplied when a user signs in.
#[derive(Clone)]
pub struct Registration {
    pub username: String,
    pub refresh_token: String,
    pub store_credential: StoreCredential,
    pub email: Option<String>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("username", &self.username)
            .field("store_credential", &self.store_credential)
            .field("has_email", &self.email.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// A fresh row was written; the user syncs once onboarded.
    Created,
    /// An onboarded user signed in again; only the platform token changed.
    TokenRefreshed,
}

impl SyncEngine {
    pub async fn register_user(
        &self,
        registration: Registration,
        now: i64,
    ) -> Result<RegisterOutcome, SyncError> {
        let token = self.cipher.encrypt(&registration.refresh_token)?;
        let existing = self.users.get_user(&registration.username).await?;
        let returning = existing
            .as_ref()
            .is_some_and(|u| !u.is_purged() && u.last_updated_epoch.is_some());

        let outcome = if returning {
            self.users
                .update_user(
                    &registration.username,
                    &UserUpdate::default().platform_token(token),
                )
                .await?;
            RegisterOutcome::TokenRefreshed
        } else {
            let credential = serde_json::to_string(&registration.store_credential)
                .map_err(anyhow::Error::new)?;
            let email = registration
                .email
                .as_deref()
                .map(|e| self.cipher.encrypt(e))
                .transpose()?;
            let record = UserRecord::new(
                registration.username.clone(),
                token,
                self.cipher.encrypt(&credential)?,
                email,
                now,
            );
            self.users.insert_user(&record).await?;
            RegisterOutcome::Created
        };

        self.registry.add_user(&registration.username);
        tracing::info!(username = %registration.username, ?outcome, "Registered user");
        Ok(outcome)
    }

    /// Forget a user: stop in-flight work, clear the row, drop the
    /// connection entry.
    pub async fn purge_user(&self, username: &str) -> Result<(), SyncError> {
        self.documents.invalidate(username);
        self.users.purge_user(username).await?;
        self.registry.remove_user(username);
        tracing::info!(username, "Purged user");
        Ok(())
    }

    pub async fn touch_active(&self, username: &str, now: i64) -> Result<(), SyncError> {
        self.users
            .update_user(username, &UserUpdate::default().last_active(now))
            .await?;
        Ok(())
    }

    /// Remove an item from the user's platform account. If it was the
    /// cursor of its listing, the cursor is replaced with the listing head.
    /// Returns whether a cursor was replaced.
    pub async fn delete_item(
        &self,
        username: &str,
        category: Category,
        kind: ItemKind,
        id: &str,
    ) -> Result<bool, SyncError> {
        let mut user = self.active_user(username).await?;
        let platform = self.connect(&user).await?;
        platform
            .remove_from_listing(category, kind, id)
            .await
            .map_err(|e| SyncError::from_platform(Some(category), e))?;

        let slot = category.slot_for(kind);
        let fullname = kind.fullname(id);
        if user.sync_info.get(category).cursor(slot) != Some(fullname.as_str()) {
            return Ok(false);
        }

        let head = probe_latest(platform.as_ref(), category, slot)
            .await
            .map_err(|e| SyncError::from_platform(Some(category), e))?;
        user.sync_info.get_mut(category).set_cursor(slot, head);
        self.users
            .update_user(username, &UserUpdate::default().sync_info(user.sync_info))
            .await?;
        tracing::debug!(username, %category, %slot, "Cursor replaced after item removal");
        Ok(true)
    }

    pub async fn fetch_comment_body(&self, username: &str, id: &str) -> Result<String, SyncError> {
        let user = self.active_user(username).await?;
        let platform = self.connect(&user).await?;
        platform
            .get_comment_body(id)
            .await
            .map_err(|e| SyncError::from_platform(None, e))
    }

    async fn active_user(&self, username: &str) -> Result<UserRecord, SyncError> {
        match self.users.get_user(username).await? {
            Some(user) if !user.is_purged() => Ok(user),
            _ => Err(SyncError::NotFound(username.to_string())),
        }
    }
}
