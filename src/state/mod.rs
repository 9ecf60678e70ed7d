//! Relational user state.
//!
//! One row per registered user holds their encrypted credentials, per-category
//! sync cursors, activity timestamps and notice throttling. A second table
//! records scheduler sweeps for the `status` command.

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{SqliteUserStore, UserStore};
pub use error::StateError;
pub use types::{CategorySyncInfo, SweepRunStats, SyncInfo, UserRecord, UserUpdate};
