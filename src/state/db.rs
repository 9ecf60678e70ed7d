//! User state trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};

use super::error::StateError;
use super::schema;
use super::types::{EmailNotif, StateSummary, SweepRunStats, SyncInfo, UserRecord, UserUpdate};

/// Persistence for user rows and sweep history.
///
/// Object-safe so the engine can hold an `Arc<dyn UserStore>`.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetch a user row, purged or not. `None` if the user never registered.
    async fn get_user(&self, username: &str) -> Result<Option<UserRecord>, StateError>;

    /// Insert a new user, or reinstate a purged one with fresh fields.
    async fn insert_user(&self, record: &UserRecord) -> Result<(), StateError>;

    /// Apply the set fields of `update`. Fails with `UserNotFound` if there
    /// is no such row or the user has been purged.
    async fn update_user(&self, username: &str, update: &UserUpdate) -> Result<(), StateError>;

    /// Null every field of the row, keeping the username.
    async fn purge_user(&self, username: &str) -> Result<(), StateError>;

    /// Usernames that still hold a platform credential.
    async fn list_all_non_purged_usernames(&self) -> Result<Vec<String>, StateError>;

    async fn start_sweep_run(&self) -> Result<i64, StateError>;

    async fn complete_sweep_run(&self, run_id: i64, stats: &SweepRunStats)
        -> Result<(), StateError>;

    async fn get_summary(&self) -> Result<StateSummary, StateError>;
}

pub struct SqliteUserStore {
    /// rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteUserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteUserStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteUserStore {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path_clone.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;
            schema::migrate(&conn)?;
            Ok::<_, StateError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))
    }
}

/// Columns as stored, before the JSON ones are decoded.
struct RawUser {
    username: String,
    platform_token_encrypted: Option<String>,
    store_credential_encrypted: Option<String>,
    email_encrypted: Option<String>,
    category_sync_info: Option<String>,
    last_updated_epoch: Option<i64>,
    last_active_epoch: Option<i64>,
    email_notif: Option<String>,
}

impl RawUser {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            username: row.get(0)?,
            platform_token_encrypted: row.get(1)?,
            store_credential_encrypted: row.get(2)?,
            email_encrypted: row.get(3)?,
            category_sync_info: row.get(4)?,
            last_updated_epoch: row.get(5)?,
            last_active_epoch: row.get(6)?,
            email_notif: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<UserRecord, StateError> {
        let sync_info = match self.category_sync_info.as_deref() {
            Some(json) => serde_json::from_str(json).map_err(|e| StateError::Corrupt {
                username: self.username.clone(),
                column: "category_sync_info",
                source: e,
            })?,
            None => SyncInfo::fresh(),
        };
        let email_notif = match self.email_notif.as_deref() {
            Some(json) => serde_json::from_str(json).map_err(|e| StateError::Corrupt {
                username: self.username.clone(),
                column: "email_notif",
                source: e,
            })?,
            None => EmailNotif::default(),
        };
        Ok(UserRecord {
            username: self.username,
            platform_token_encrypted: self.platform_token_encrypted,
            store_credential_encrypted: self.store_credential_encrypted,
            email_encrypted: self.email_encrypted,
            sync_info,
            last_updated_epoch: self.last_updated_epoch,
            last_active_epoch: self.last_active_epoch,
            email_notif,
        })
    }
}

fn to_json<T: serde::Serialize>(
    username: &str,
    column: &'static str,
    value: &T,
) -> Result<String, StateError> {
    serde_json::to_string(value).map_err(|e| StateError::Corrupt {
        username: username.to_string(),
        column,
        source: e,
    })
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn get_user(&self, username: &str) -> Result<Option<UserRecord>, StateError> {
        let raw = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT username, platform_token_encrypted, store_credential_encrypted, \
                 email_encrypted, category_sync_info, last_updated_epoch, last_active_epoch, \
                 email_notif FROM users WHERE username = ?1",
                [username],
                RawUser::from_row,
            )
            .optional()
            .map_err(StateError::query)?
        };
        raw.map(RawUser::into_record).transpose()
    }

    async fn insert_user(&self, record: &UserRecord) -> Result<(), StateError> {
        let sync_info = to_json(&record.username, "category_sync_info", &record.sync_info)?;
        let email_notif = to_json(&record.username, "email_notif", &record.email_notif)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (username, platform_token_encrypted, store_credential_encrypted, \
             email_encrypted, category_sync_info, last_updated_epoch, last_active_epoch, \
             email_notif, purged_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL) \
             ON CONFLICT(username) DO UPDATE SET \
                platform_token_encrypted = excluded.platform_token_encrypted, \
                store_credential_encrypted = excluded.store_credential_encrypted, \
                email_encrypted = excluded.email_encrypted, \
                category_sync_info = excluded.category_sync_info, \
                last_updated_epoch = excluded.last_updated_epoch, \
                last_active_epoch = excluded.last_active_epoch, \
                email_notif = excluded.email_notif, \
                purged_at = NULL",
            params![
                record.username,
                record.platform_token_encrypted,
                record.store_credential_encrypted,
                record.email_encrypted,
                sync_info,
                record.last_updated_epoch,
                record.last_active_epoch,
                email_notif,
            ],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn update_user(&self, username: &str, update: &UserUpdate) -> Result<(), StateError> {
        let mut sets: Vec<(&str, SqlValue)> = Vec::new();
        if let Some(v) = &update.platform_token_encrypted {
            sets.push(("platform_token_encrypted", SqlValue::Text(v.clone())));
        }
        if let Some(v) = &update.store_credential_encrypted {
            sets.push(("store_credential_encrypted", SqlValue::Text(v.clone())));
        }
        if let Some(v) = &update.email_encrypted {
            sets.push(("email_encrypted", SqlValue::Text(v.clone())));
        }
        if let Some(v) = &update.sync_info {
            let json = to_json(username, "category_sync_info", v)?;
            sets.push(("category_sync_info", SqlValue::Text(json)));
        }
        if let Some(v) = update.last_updated_epoch {
            sets.push(("last_updated_epoch", SqlValue::Integer(v)));
        }
        if let Some(v) = update.last_active_epoch {
            sets.push(("last_active_epoch", SqlValue::Integer(v)));
        }
        if let Some(v) = &update.email_notif {
            let json = to_json(username, "email_notif", v)?;
            sets.push(("email_notif", SqlValue::Text(json)));
        }
        if sets.is_empty() {
            return Ok(());
        }

        let assignments: Vec<String> = sets
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{column} = ?{}", i + 1))
            .collect();
        let sql = format!(
            "UPDATE users SET {} WHERE username = ?{} AND purged_at IS NULL",
            assignments.join(", "),
            sets.len() + 1
        );
        let mut values: Vec<SqlValue> = sets.into_iter().map(|(_, v)| v).collect();
        values.push(SqlValue::Text(username.to_string()));

        let conn = self.lock()?;
        let changed = conn
            .execute(&sql, rusqlite::params_from_iter(values))
            .map_err(StateError::query)?;
        if changed == 0 {
            return Err(StateError::UserNotFound(username.to_string()));
        }
        Ok(())
    }

    async fn purge_user(&self, username: &str) -> Result<(), StateError> {
        let now = Utc::now().timestamp();
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE users SET platform_token_encrypted = NULL, \
                 store_credential_encrypted = NULL, email_encrypted = NULL, \
                 category_sync_info = NULL, last_updated_epoch = NULL, \
                 last_active_epoch = NULL, email_notif = NULL, purged_at = ?2 \
                 WHERE username = ?1",
                params![username, now],
            )
            .map_err(StateError::query)?;
        if changed == 0 {
            return Err(StateError::UserNotFound(username.to_string()));
        }
        Ok(())
    }

    async fn list_all_non_purged_usernames(&self) -> Result<Vec<String>, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT username FROM users WHERE platform_token_encrypted IS NOT NULL \
                 ORDER BY username",
            )
            .map_err(StateError::query)?;
        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(StateError::query)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(StateError::query)?;
        Ok(names)
    }

    async fn start_sweep_run(&self) -> Result<i64, StateError> {
        let started_at = Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sweep_runs (started_at) VALUES (?1)",
            [started_at],
        )
        .map_err(StateError::query)?;
        Ok(conn.last_insert_rowid())
    }

    async fn complete_sweep_run(
        &self,
        run_id: i64,
        stats: &SweepRunStats,
    ) -> Result<(), StateError> {
        let completed_at = Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sweep_runs SET completed_at = ?1, users_seen = ?2, users_synced = ?3, \
             users_failed = ?4, users_skipped = ?5, interrupted = ?6 WHERE id = ?7",
            params![
                completed_at,
                stats.users_seen as i64,
                stats.users_synced as i64,
                stats.users_failed as i64,
                stats.users_skipped as i64,
                stats.interrupted,
                run_id,
            ],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn get_summary(&self) -> Result<StateSummary, StateError> {
        let conn = self.lock()?;
        let count = |sql: &str| -> Result<u64, StateError> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(StateError::query)
        };
        let total_users = count("SELECT COUNT(*) FROM users")?;
        let active_users =
            count("SELECT COUNT(*) FROM users WHERE platform_token_encrypted IS NOT NULL")?;
        let onboarded_users = count(
            "SELECT COUNT(*) FROM users WHERE platform_token_encrypted IS NOT NULL \
             AND last_updated_epoch IS NOT NULL",
        )?;

        type SweepRow = (Option<i64>, Option<i64>, i64, i64, i64, i64, bool);
        let last: Option<SweepRow> = conn
            .query_row(
                "SELECT started_at, completed_at, users_seen, users_synced, users_failed, \
                 users_skipped, interrupted FROM sweep_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()
            .map_err(StateError::query)?;

        let to_time = |ts: Option<i64>| ts.and_then(|t| Utc.timestamp_opt(t, 0).single());
        Ok(match last {
            Some((started, completed, seen, synced, failed, skipped, interrupted)) => {
                StateSummary {
                    total_users,
                    active_users,
                    onboarded_users,
                    last_sweep_started: to_time(started),
                    last_sweep_completed: to_time(completed),
                    last_sweep_stats: completed.map(|_| SweepRunStats {
                        users_seen: seen as u64,
                        users_synced: synced as u64,
                        users_failed: failed as u64,
                        users_skipped: skipped as u64,
                        interrupted,
                    }),
                }
            }
            None => StateSummary {
                total_users,
                active_users,
                onboarded_users,
                last_sweep_started: None,
                last_sweep_completed: None,
                last_sweep_stats: None,
            },
        })
    }
}
