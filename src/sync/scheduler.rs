//! Periodic sweep over all registered users.
//!
//! A timer fires every interval; each tick starts a sweep only if the
//! previous one has finished. A sweep walks the current non-purged users
//! one at a time and decides per user whether to sync, notify, or skip.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::error::SyncError;
use super::orchestrator::{SyncEngine, SyncReport};
use super::SyncPolicy;
use crate::notify::email::{inactivity_body, INACTIVITY_SUBJECT};
use crate::notify::SyncEvent;
use crate::state::{SweepRunStats, SyncInfo, UserRecord, UserUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    Running,
}

/// Allows at most one sweep at a time.
#[derive(Debug, Default)]
pub struct SweepGate {
    running: AtomicBool,
}

impl SweepGate {
    pub fn state(&self) -> SweepState {
        if self.running.load(Ordering::SeqCst) {
            SweepState::Running
        } else {
            SweepState::Idle
        }
    }

    /// Claim the gate. `None` if a sweep is already running.
    pub fn try_begin(self: &Arc<Self>) -> Option<SweepGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SweepGuard { gate: self.clone() })
    }
}

/// Returns the gate to idle when dropped, including on panic.
pub struct SweepGuard {
    gate: Arc<SweepGate>,
}

impl Drop for SweepGuard {
    fn drop(&mut self) {
        self.gate.running.store(false, Ordering::SeqCst);
    }
}

/// What a sweep should do with one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Registered but the first sync has not completed.
    NotOnboarded,
    /// Idle too long to sync. `notify` when an inactivity notice is due.
    Inactive { notify: bool },
    NotDue,
    Due,
}

pub fn eligibility(user: &UserRecord, policy: &SyncPolicy, now: i64) -> Eligibility {
    let Some(last_updated) = user.last_updated_epoch else {
        return Eligibility::NotOnboarded;
    };
    let last_active = user.last_active_epoch.unwrap_or(0);
    if now - last_active >= policy.inactive_after_secs {
        let last_notice = user.email_notif.last_inactive_notif_epoch.unwrap_or(0);
        return Eligibility::Inactive {
            notify: now - last_notice >= policy.inactive_notice_secs,
        };
    }
    if now - last_updated >= policy.min_resync_secs {
        Eligibility::Due
    } else {
        Eligibility::NotDue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserOutcome {
    Skipped,
    Inactive,
    Synced,
    Failed,
}

pub struct Scheduler {
    engine: Arc<SyncEngine>,
    gate: Arc<SweepGate>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(engine: Arc<SyncEngine>, interval: Duration) -> Self {
        Self {
            engine,
            gate: Arc::new(SweepGate::default()),
            interval,
        }
    }

    pub fn gate(&self) -> Arc<SweepGate> {
        self.gate.clone()
    }

    /// Start a sweep in the background unless one is still running.
    pub fn tick(&self, shutdown: &CancellationToken) -> Option<JoinHandle<SweepRunStats>> {
        let guard = self.gate.try_begin()?;
        let engine = self.engine.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            run_sweep(&engine, &shutdown).await
        }))
    }

    /// Tick until `shutdown` fires, then wait for the sweep in flight. The
    /// first tick fires immediately.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<SweepRunStats>> = None;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick(&shutdown) {
                        Some(handle) => in_flight = Some(handle),
                        None => tracing::debug!("Previous sweep still running, skipping tick"),
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        if let Some(handle) = in_flight {
            if !handle.is_finished() {
                tracing::info!("Waiting for the current sweep to stop...");
            }
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Sweep task panicked");
            }
        }
    }
}

/// One pass over every non-purged user. Never fails as a whole.
pub async fn run_sweep(engine: &SyncEngine, shutdown: &CancellationToken) -> SweepRunStats {
    let mut stats = SweepRunStats::default();
    let run_id = match engine.users.start_sweep_run().await {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to record sweep start");
            None
        }
    };

    let usernames = match engine.users.list_all_non_purged_usernames().await {
        Ok(names) => names,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list users, skipping sweep");
            Vec::new()
        }
    };
    tracing::debug!(users = usernames.len(), "Sweep started");

    for username in &usernames {
        if shutdown.is_cancelled() {
            stats.interrupted = true;
            break;
        }
        stats.users_seen += 1;
        let now = Utc::now().timestamp();
        match process_user(engine, username, now).await {
            Ok(UserOutcome::Synced) => stats.users_synced += 1,
            Ok(UserOutcome::Failed) => stats.users_failed += 1,
            Ok(UserOutcome::Skipped | UserOutcome::Inactive) => stats.users_skipped += 1,
            Err(e) => {
                stats.users_failed += 1;
                tracing::error!(username = %username, error = %e, "User sync failed");
            }
        }
    }

    if let Some(run_id) = run_id {
        if let Err(e) = engine.users.complete_sweep_run(run_id, &stats).await {
            tracing::warn!(error = %e, "Failed to record sweep completion");
        }
    }
    tracing::debug!(?stats, "Sweep finished");
    stats
}

/// Decide and act for one user.
pub async fn process_user(
    engine: &SyncEngine,
    username: &str,
    now: i64,
) -> Result<UserOutcome, SyncError> {
    let Some(mut user) = engine.users.get_user(username).await? else {
        return Ok(UserOutcome::Skipped);
    };
    if user.is_purged() {
        return Ok(UserOutcome::Skipped);
    }

    match eligibility(&user, &engine.policy, now) {
        Eligibility::NotOnboarded | Eligibility::NotDue => Ok(UserOutcome::Skipped),
        Eligibility::Inactive { notify } => {
            if notify {
                send_inactivity_notice(engine, &mut user, now).await;
            }
            Ok(UserOutcome::Inactive)
        }
        Eligibility::Due => {
            let report = sync_and_repair(engine, &mut user, now).await?;
            Ok(if report.is_clean() {
                UserOutcome::Synced
            } else {
                UserOutcome::Failed
            })
        }
    }
}

/// Sync `username` now, regardless of activity or the resync gap.
pub async fn sync_once(
    engine: &SyncEngine,
    username: &str,
    now: i64,
) -> Result<SyncReport, SyncError> {
    let mut user = match engine.users.get_user(username).await? {
        Some(user) if !user.is_purged() => user,
        _ => return Err(SyncError::NotFound(username.to_string())),
    };
    sync_and_repair(engine, &mut user, now).await
}

/// Sync, repair any cursor the platform refused, and tell the client.
async fn sync_and_repair(
    engine: &SyncEngine,
    user: &mut UserRecord,
    now: i64,
) -> Result<SyncReport, SyncError> {
    let before = user.sync_info.clone();
    let report = engine.sync_user(user, now).await?;

    let stale = report.stale_cursor_failures();
    if !stale.is_empty() {
        if let Err(e) = engine.repair_cursors(user, &stale).await {
            tracing::error!(username = %user.username, error = %e, "Failed to persist repaired cursors");
        }
    }
    if report.committed() {
        announce(engine, user, &before);
    }
    Ok(report)
}

async fn send_inactivity_notice(engine: &SyncEngine, user: &mut UserRecord, now: i64) {
    engine
        .notifier
        .send_notice(user, INACTIVITY_SUBJECT, &inactivity_body(engine.policy.inactive_after_secs))
        .await;
    user.email_notif.last_inactive_notif_epoch = Some(now);
    if let Err(e) = engine
        .users
        .update_user(&user.username, &UserUpdate::default().email_notif(user.email_notif))
        .await
    {
        tracing::warn!(username = %user.username, error = %e, "Failed to record notice time");
    }
}

/// Tell a connected client which categories changed and when it last synced.
fn announce(engine: &SyncEngine, user: &UserRecord, before: &SyncInfo) {
    let Some(connection) = engine.registry.lookup(&user.username) else {
        return;
    };
    let categories = user.sync_info.categories_with_new_data(before);
    if !categories.is_empty() {
        engine
            .events
            .emit(&connection, SyncEvent::ShowRefreshAlert { categories });
    }
    if let Some(epoch) = user.last_updated_epoch {
        engine
            .events
            .emit(&connection, SyncEvent::StoreLastUpdatedEpoch { epoch });
    }
}
