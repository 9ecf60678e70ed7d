//! Database schema and migrations.

use rusqlite::Connection;

use super::error::StateError;

/// Migrations in order; `user_version` records how many have been applied.
const MIGRATIONS: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY NOT NULL,
    platform_token_encrypted TEXT,
    store_credential_encrypted TEXT,
    email_encrypted TEXT,
    category_sync_info TEXT,
    last_updated_epoch INTEGER,
    last_active_epoch INTEGER,
    email_notif TEXT,
    purged_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_users_active ON users(platform_token_encrypted)
    WHERE platform_token_encrypted IS NOT NULL;

CREATE TABLE IF NOT EXISTS sweep_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    users_seen INTEGER DEFAULT 0,
    users_synced INTEGER DEFAULT 0,
    users_failed INTEGER DEFAULT 0,
    users_skipped INTEGER DEFAULT 0,
    interrupted INTEGER DEFAULT 0
);
"#,
];

pub const SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, StateError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Bring the schema up to [`SCHEMA_VERSION`]. Idempotent.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StateError> {
    let current = get_schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(StateError::UnsupportedSchemaVersion {
            found: current,
            expected: SCHEMA_VERSION,
        });
    }

    for (index, ddl) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = index as i32 + 1;
        conn.execute_batch(ddl)?;
        conn.pragma_update(None, "user_version", version)?;
        tracing::debug!(version, "Applied state schema migration");
    }
    Ok(())
}
