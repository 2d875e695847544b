//! Persistent clip store.
//!
//! SQLite-backed storage for synced clips, the sync run ledger, the
//! checkpoint entry and daily statistics snapshots.

pub mod db;
pub mod error;
pub mod lock;
pub mod schema;
pub mod types;

pub use db::{ClipStore, SqliteClipStore};
pub use error::StateError;
pub use lock::InstanceLock;
pub use types::{ClipRecord, ClipStatus, DailyStats, SyncMode, SyncRunStats};
