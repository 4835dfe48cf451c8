//! Table definitions for the embedded store.
//!
//! Timestamps are integer Unix milliseconds. `synced_at` is written only by
//! the sync subsystem; every other column belongs to the owning service.

use reviewsync_common::EntityType;

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workspaces (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    root_path TEXT NOT NULL,
    git_remote TEXT,
    metadata TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    synced_at INTEGER
);

CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    workspace_id TEXT REFERENCES workspaces(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    language TEXT,
    content_hash TEXT,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    synced_at INTEGER
);

CREATE TABLE IF NOT EXISTS reviews (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    base_ref TEXT,
    head_ref TEXT,
    status TEXT NOT NULL,
    summary TEXT,
    config TEXT,
    created_at INTEGER NOT NULL,
    completed_at INTEGER,
    updated_at INTEGER NOT NULL,
    synced_at INTEGER
);

CREATE TABLE IF NOT EXISTS review_files (
    id TEXT PRIMARY KEY,
    review_id TEXT NOT NULL REFERENCES reviews(id) ON DELETE CASCADE,
    file_id TEXT REFERENCES files(id) ON DELETE SET NULL,
    file_path TEXT NOT NULL,
    status TEXT NOT NULL,
    summary TEXT,
    issue_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    synced_at INTEGER
);

CREATE TABLE IF NOT EXISTS issues (
    id TEXT PRIMARY KEY,
    review_id TEXT NOT NULL REFERENCES reviews(id) ON DELETE CASCADE,
    review_file_id TEXT REFERENCES review_files(id) ON DELETE SET NULL,
    file_path TEXT NOT NULL,
    line_start INTEGER,
    line_end INTEGER,
    severity TEXT NOT NULL,
    category TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    suggestion TEXT,
    metadata TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    synced_at INTEGER
);

CREATE TABLE IF NOT EXISTS sync_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sync_type TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    success INTEGER NOT NULL,
    error_type TEXT,
    error_message TEXT,
    items_synced INTEGER NOT NULL DEFAULT 0,
    started_at INTEGER NOT NULL,
    completed_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_workspaces_updated ON workspaces(updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_files_workspace ON files(workspace_id, updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_reviews_workspace ON reviews(workspace_id, updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_review_files_review ON review_files(review_id, updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_issues_review ON issues(review_id, updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_sync_logs_entity ON sync_logs(entity_type, entity_id, completed_at DESC);
CREATE INDEX IF NOT EXISTS idx_sync_logs_completed ON sync_logs(completed_at DESC);
"#;

/// Table name and scoping foreign key for an entity type.
pub(crate) fn table_for(entity_type: EntityType) -> (&'static str, Option<&'static str>) {
    match entity_type {
        EntityType::Workspace => ("workspaces", None),
        EntityType::File => ("files", Some("workspace_id")),
        EntityType::Review => ("reviews", Some("workspace_id")),
        EntityType::ReviewFile => ("review_files", Some("review_id")),
        EntityType::Issue => ("issues", Some("review_id")),
    }
}
