//! SQLite-backed local store.
//!
//! Holds the five domain tables, the append-only `sync_logs` audit table and
//! the key/value `settings` table behind a single connection.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use reviewsync_common::{EntityType, Error, Result, SyncErrorType};

use crate::models::{
    from_millis, to_millis, Entity, Issue, NewSyncLog, Review, ReviewFile, SourceFile, SyncLog,
    Workspace,
};
use crate::schema::{table_for, SCHEMA};

/// How long SQLite itself waits on a locked database before reporting busy.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Parent IDs bound per `IN (...)` query.
const PARENT_CHUNK: usize = 500;

const WORKSPACE_COLUMNS: &str =
    "id, name, root_path, git_remote, metadata, created_at, updated_at, synced_at";
const FILE_COLUMNS: &str = "id, workspace_id, path, language, content_hash, size_bytes, \
     created_at, updated_at, synced_at";
const REVIEW_COLUMNS: &str = "id, workspace_id, title, base_ref, head_ref, status, summary, \
     config, created_at, completed_at, updated_at, synced_at";
const REVIEW_FILE_COLUMNS: &str = "id, review_id, file_id, file_path, status, summary, \
     issue_count, created_at, updated_at, synced_at";
const ISSUE_COLUMNS: &str = "id, review_id, review_file_id, file_path, line_start, line_end, \
     severity, category, title, description, suggestion, metadata, created_at, updated_at, \
     synced_at";
const SYNC_LOG_COLUMNS: &str = "id, sync_type, entity_type, entity_id, success, error_type, \
     error_message, items_synced, started_at, completed_at";

/// Map a SQLite failure onto the common error, keeping lock contention distinct.
pub(crate) fn db_err(err: rusqlite::Error) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            Error::Busy(err.to_string())
        }
        _ => Error::Database(err.to_string()),
    }
}

fn opt_time(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.map(from_millis)
}

fn opt_millis(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(to_millis)
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = Error>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn workspace_from_row(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        root_path: row.get(2)?,
        git_remote: row.get(3)?,
        metadata: row.get(4)?,
        created_at: from_millis(row.get(5)?),
        updated_at: from_millis(row.get(6)?),
        synced_at: opt_time(row.get(7)?),
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<SourceFile> {
    Ok(SourceFile {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        path: row.get(2)?,
        language: row.get(3)?,
        content_hash: row.get(4)?,
        size_bytes: row.get(5)?,
        created_at: from_millis(row.get(6)?),
        updated_at: from_millis(row.get(7)?),
        synced_at: opt_time(row.get(8)?),
    })
}

fn review_from_row(row: &Row<'_>) -> rusqlite::Result<Review> {
    Ok(Review {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        title: row.get(2)?,
        base_ref: row.get(3)?,
        head_ref: row.get(4)?,
        status: row.get(5)?,
        summary: row.get(6)?,
        config: row.get(7)?,
        created_at: from_millis(row.get(8)?),
        completed_at: opt_time(row.get(9)?),
        updated_at: from_millis(row.get(10)?),
        synced_at: opt_time(row.get(11)?),
    })
}

fn review_file_from_row(row: &Row<'_>) -> rusqlite::Result<ReviewFile> {
    Ok(ReviewFile {
        id: row.get(0)?,
        review_id: row.get(1)?,
        file_id: row.get(2)?,
        file_path: row.get(3)?,
        status: row.get(4)?,
        summary: row.get(5)?,
        issue_count: row.get(6)?,
        created_at: from_millis(row.get(7)?),
        updated_at: from_millis(row.get(8)?),
        synced_at: opt_time(row.get(9)?),
    })
}

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        review_id: row.get(1)?,
        review_file_id: row.get(2)?,
        file_path: row.get(3)?,
        line_start: row.get(4)?,
        line_end: row.get(5)?,
        severity: row.get(6)?,
        category: row.get(7)?,
        title: row.get(8)?,
        description: row.get(9)?,
        suggestion: row.get(10)?,
        metadata: row.get(11)?,
        created_at: from_millis(row.get(12)?),
        updated_at: from_millis(row.get(13)?),
        synced_at: opt_time(row.get(14)?),
    })
}

fn sync_log_from_row(row: &Row<'_>) -> rusqlite::Result<SyncLog> {
    let error_type: Option<String> = row.get(5)?;
    let error_type: Option<SyncErrorType> = error_type
        .map(|raw| raw.parse())
        .transpose()
        .map_err(|e: Error| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(SyncLog {
        id: row.get(0)?,
        sync_type: parse_column(row, 1)?,
        entity_type: parse_column(row, 2)?,
        entity_id: row.get(3)?,
        success: row.get::<_, i64>(4)? != 0,
        error_type,
        error_message: row.get(6)?,
        items_synced: row.get(7)?,
        started_at: from_millis(row.get(8)?),
        completed_at: from_millis(row.get(9)?),
    })
}

/// Embedded store for domain records, sync logs and settings.
///
/// Clones share one connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create a store at `path` with the default busy timeout.
    ///
    /// # Errors
    /// - Database creation or schema failure
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open or create a store with an explicit busy timeout.
    pub fn open_with_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err)?;
        conn.busy_timeout(busy_timeout).map_err(db_err)?;

        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(db_err)?;
        debug!(journal_mode = %mode, path = %path.as_ref().display(), "Opened store");

        Self::init(conn)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        info!("Local store opened successfully");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("Connection mutex poisoned".to_string()))
    }

    // ------------------------------------------------------------------
    // Domain records
    // ------------------------------------------------------------------

    pub fn insert_workspace(&self, workspace: &Workspace) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO workspaces ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                WORKSPACE_COLUMNS
            ),
            params![
                workspace.id,
                workspace.name,
                workspace.root_path,
                workspace.git_remote,
                workspace.metadata,
                to_millis(workspace.created_at),
                to_millis(workspace.updated_at),
                opt_millis(workspace.synced_at),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_workspace(&self, id: &str) -> Result<Option<Workspace>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM workspaces WHERE id = ?1", WORKSPACE_COLUMNS),
            [id],
            workspace_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn insert_file(&self, file: &SourceFile) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO files ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                FILE_COLUMNS
            ),
            params![
                file.id,
                file.workspace_id,
                file.path,
                file.language,
                file.content_hash,
                file.size_bytes,
                to_millis(file.created_at),
                to_millis(file.updated_at),
                opt_millis(file.synced_at),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_file(&self, id: &str) -> Result<Option<SourceFile>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM files WHERE id = ?1", FILE_COLUMNS),
            [id],
            file_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn insert_review(&self, review: &Review) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO reviews ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                REVIEW_COLUMNS
            ),
            params![
                review.id,
                review.workspace_id,
                review.title,
                review.base_ref,
                review.head_ref,
                review.status,
                review.summary,
                review.config,
                to_millis(review.created_at),
                opt_millis(review.completed_at),
                to_millis(review.updated_at),
                opt_millis(review.synced_at),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_review(&self, id: &str) -> Result<Option<Review>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM reviews WHERE id = ?1", REVIEW_COLUMNS),
            [id],
            review_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn insert_review_file(&self, review_file: &ReviewFile) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO review_files ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                REVIEW_FILE_COLUMNS
            ),
            params![
                review_file.id,
                review_file.review_id,
                review_file.file_id,
                review_file.file_path,
                review_file.status,
                review_file.summary,
                review_file.issue_count,
                to_millis(review_file.created_at),
                to_millis(review_file.updated_at),
                opt_millis(review_file.synced_at),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_review_file(&self, id: &str) -> Result<Option<ReviewFile>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM review_files WHERE id = ?1", REVIEW_FILE_COLUMNS),
            [id],
            review_file_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn insert_issue(&self, issue: &Issue) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO issues ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                ISSUE_COLUMNS
            ),
            params![
                issue.id,
                issue.review_id,
                issue.review_file_id,
                issue.file_path,
                issue.line_start,
                issue.line_end,
                issue.severity,
                issue.category,
                issue.title,
                issue.description,
                issue.suggestion,
                issue.metadata,
                to_millis(issue.created_at),
                to_millis(issue.updated_at),
                opt_millis(issue.synced_at),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_issue(&self, id: &str) -> Result<Option<Issue>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM issues WHERE id = ?1", ISSUE_COLUMNS),
            [id],
            issue_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    /// Look up any record by type and ID.
    pub fn load_entity(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>> {
        Ok(match entity_type {
            EntityType::Workspace => self.get_workspace(id)?.map(Entity::Workspace),
            EntityType::File => self.get_file(id)?.map(Entity::File),
            EntityType::Review => self.get_review(id)?.map(Entity::Review),
            EntityType::ReviewFile => self.get_review_file(id)?.map(Entity::ReviewFile),
            EntityType::Issue => self.get_issue(id)?.map(Entity::Issue),
        })
    }

    /// Record a local mutation by bumping `updated_at`.
    ///
    /// The new value is strictly greater than both the previous `updated_at`
    /// and the last `synced_at`, so the record always becomes a candidate.
    pub fn touch(&self, entity_type: EntityType, id: &str) -> Result<()> {
        let (table, _) = table_for(entity_type);
        let conn = self.conn()?;
        let changed = conn
            .execute(
                &format!(
                    "UPDATE {} SET updated_at = MAX(?1, updated_at + 1, COALESCE(synced_at, 0) + 1) \
                     WHERE id = ?2",
                    table
                ),
                params![to_millis(Utc::now()), id],
            )
            .map_err(db_err)?;

        if changed == 0 {
            return Err(Error::NotFound(format!("{} {}", entity_type, id)));
        }
        Ok(())
    }

    /// Delete a record. Children go with it through `ON DELETE CASCADE`.
    ///
    /// Sync log rows are kept.
    pub fn delete_entity(&self, entity_type: EntityType, id: &str) -> Result<()> {
        let (table, _) = table_for(entity_type);
        let conn = self.conn()?;
        let changed = conn
            .execute(&format!("DELETE FROM {} WHERE id = ?1", table), [id])
            .map_err(db_err)?;

        if changed == 0 {
            return Err(Error::NotFound(format!("{} {}", entity_type, id)));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sync state
    // ------------------------------------------------------------------

    /// IDs that were never pushed or changed since their last push, newest first.
    ///
    /// With `parents` set, only records whose scoping foreign key is in the
    /// list are returned; an empty list yields nothing. Without it every
    /// record of the type is eligible, including ones with no parent.
    pub fn unsynced_ids(
        &self,
        entity_type: EntityType,
        parents: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let (table, parent_column) = table_for(entity_type);
        let conn = self.conn()?;

        let Some(parents) = parents else {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT id FROM {} \
                     WHERE synced_at IS NULL OR synced_at < updated_at \
                     ORDER BY updated_at DESC, id \
                     LIMIT ?1",
                    table
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map([limit as i64], |row| row.get(0))
                .map_err(db_err)?;
            return rows.collect::<rusqlite::Result<Vec<String>>>().map_err(db_err);
        };

        let Some(parent_column) = parent_column else {
            return Err(Error::InvalidInput(format!(
                "{} records have no parent scope",
                entity_type
            )));
        };

        let mut found: Vec<(String, i64)> = Vec::new();
        for chunk in parents.chunks(PARENT_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT id, updated_at FROM {} \
                     WHERE (synced_at IS NULL OR synced_at < updated_at) \
                     AND {} IN ({}) \
                     ORDER BY updated_at DESC, id \
                     LIMIT {}",
                    table, parent_column, placeholders, limit
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .map_err(db_err)?;
            for row in rows {
                found.push(row.map_err(db_err)?);
            }
        }

        found.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        found.truncate(limit);
        Ok(found.into_iter().map(|(id, _)| id).collect())
    }

    /// IDs whose most recent sync log row is a failure.
    ///
    /// "Most recent" is by `completed_at`, ties broken by insertion order, so
    /// a record that failed and later succeeded is not returned. Records
    /// deleted since their last attempt are skipped.
    pub fn failed_ids(&self, entity_type: EntityType, limit: usize) -> Result<Vec<String>> {
        let (table, _) = table_for(entity_type);
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT entity_id FROM ( \
                     SELECT entity_id, success, completed_at, \
                            ROW_NUMBER() OVER ( \
                                PARTITION BY entity_id \
                                ORDER BY completed_at DESC, id DESC \
                            ) AS rn \
                     FROM sync_logs \
                     WHERE entity_type = ?1 \
                 ) \
                 WHERE rn = 1 AND success = 0 \
                   AND entity_id IN (SELECT id FROM {}) \
                 ORDER BY completed_at DESC \
                 LIMIT ?2",
                table
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![entity_type.as_str(), limit as i64], |row| row.get(0))
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<String>>>().map_err(db_err)
    }

    /// Advance `synced_at` to `at`. Never moves it backwards.
    ///
    /// # Errors
    /// - `NotFound` if the record no longer exists
    pub fn mark_synced(&self, entity_type: EntityType, id: &str, at: DateTime<Utc>) -> Result<()> {
        let (table, _) = table_for(entity_type);
        let conn = self.conn()?;
        let changed = conn
            .execute(
                &format!(
                    "UPDATE {} SET synced_at = ?1 \
                     WHERE id = ?2 AND (synced_at IS NULL OR synced_at < ?1)",
                    table
                ),
                params![to_millis(at), id],
            )
            .map_err(db_err)?;

        if changed == 0 {
            let exists: Option<i64> = conn
                .query_row(&format!("SELECT 1 FROM {} WHERE id = ?1", table), [id], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(db_err)?;
            if exists.is_none() {
                return Err(Error::NotFound(format!("{} {}", entity_type, id)));
            }
            debug!(%entity_type, entity_id = id, "synced_at already at or past push time");
        }
        Ok(())
    }

    /// Number of records needing sync, per type, in dependency order.
    pub fn pending_counts(&self) -> Result<Vec<(EntityType, u64)>> {
        let conn = self.conn()?;
        let mut counts = Vec::with_capacity(EntityType::ALL.len());
        for entity_type in EntityType::ALL {
            let (table, _) = table_for(entity_type);
            let count: i64 = conn
                .query_row(
                    &format!(
                        "SELECT COUNT(*) FROM {} WHERE synced_at IS NULL OR synced_at < updated_at",
                        table
                    ),
                    [],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            counts.push((entity_type, count as u64));
        }
        Ok(counts)
    }

    // ------------------------------------------------------------------
    // Sync logs
    // ------------------------------------------------------------------

    /// Append one attempt to the audit log and return its row ID.
    pub fn record_log(&self, log: &NewSyncLog) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_logs \
             (sync_type, entity_type, entity_id, success, error_type, error_message, \
              items_synced, started_at, completed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                log.sync_type.as_str(),
                log.entity_type.as_str(),
                log.entity_id,
                log.success as i64,
                log.error_type.map(|t| t.as_str()),
                log.error_message,
                log.items_synced,
                to_millis(log.started_at),
                to_millis(log.completed_at),
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent log rows across all entities.
    pub fn recent_logs(&self, limit: usize) -> Result<Vec<SyncLog>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM sync_logs ORDER BY completed_at DESC, id DESC LIMIT ?1",
                SYNC_LOG_COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([limit as i64], sync_log_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Log rows for one entity, newest first.
    pub fn logs_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        limit: usize,
    ) -> Result<Vec<SyncLog>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM sync_logs \
                 WHERE entity_type = ?1 AND entity_id = ?2 \
                 ORDER BY completed_at DESC, id DESC LIMIT ?3",
                SYNC_LOG_COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![entity_type.as_str(), entity_id, limit as i64],
                sync_log_from_row,
            )
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(db_err)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, to_millis(Utc::now())],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM settings WHERE key = ?1", [key])
            .map_err(db_err)?;
        Ok(())
    }

    /// All settings ordered by key.
    pub fn all_settings(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM settings ORDER BY key")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}
