//! Embedded local store for ReviewSync.
//!
//! Holds the domain records (workspaces, files, reviews, review files,
//! issues), the append-only sync audit log and the application settings in
//! a single SQLite database.
//!
//! # Design Principles
//! - `synced_at` is the only column the sync subsystem writes on domain tables
//! - Sync logs are append-only
//! - Lock contention surfaces as `Error::Busy` so callers can retry
//! - The `SyncRepository` and `SettingsStore` traits keep storage mockable

pub mod memory;
pub mod models;
pub mod repository;
mod schema;
pub mod sqlite;

pub use memory::MemoryRepository;
pub use models::{
    needs_sync, Entity, Issue, NewSyncLog, Review, ReviewFile, SourceFile, SyncLog, Workspace,
};
pub use repository::{setting_keys, sync_enabled, SettingsStore, SyncRepository};
pub use sqlite::Store;
