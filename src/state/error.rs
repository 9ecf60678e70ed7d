//! Error types for the user state database.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    /// Failed to open or create the database file.
    #[error("Failed to open database at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("Database migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    #[error("Database query failed: {0}")]
    Query(String),

    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    #[error("Database schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },

    #[error("User {0} not found")]
    UserNotFound(String),

    /// A JSON column could not be encoded or decoded.
    #[error("Corrupt {column} for user {username}: {source}")]
    Corrupt {
        username: String,
        column: &'static str,
        source: serde_json::Error,
    },
}

impl StateError {
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }
}
