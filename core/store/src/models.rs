//! Domain records held in the local store and the sync audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reviewsync_common::{EntityType, SyncErrorType, SyncType};

/// Convert a timestamp to the integer milliseconds stored on disk.
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Convert stored milliseconds back to a timestamp.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// True when a record has never been pushed or changed since its last push.
pub fn needs_sync(updated_at: DateTime<Utc>, synced_at: Option<DateTime<Utc>>) -> bool {
    match synced_at {
        None => true,
        Some(synced) => to_millis(synced) < to_millis(updated_at),
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A local checkout under review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub root_path: String,
    pub git_remote: Option<String>,
    /// Opaque JSON document owned by the workspace service.
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl Workspace {
    pub fn new(name: impl Into<String>, root_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.into(),
            root_path: root_path.into(),
            git_remote: None,
            metadata: None,
            created_at: now,
            updated_at: now,
            synced_at: None,
        }
    }
}

/// A source file known to the indexer.
///
/// Files discovered outside any workspace have no `workspace_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: String,
    pub workspace_id: Option<String>,
    pub path: String,
    pub language: Option<String>,
    pub content_hash: Option<String>,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl SourceFile {
    pub fn new(workspace_id: Option<&str>, path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            workspace_id: workspace_id.map(str::to_string),
            path: path.into(),
            language: None,
            content_hash: None,
            size_bytes: 0,
            created_at: now,
            updated_at: now,
            synced_at: None,
        }
    }
}

/// One code review over a diff in a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub workspace_id: String,
    pub title: String,
    pub base_ref: Option<String>,
    pub head_ref: Option<String>,
    pub status: String,
    pub summary: Option<String>,
    /// Opaque JSON review configuration.
    pub config: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl Review {
    pub fn new(workspace_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            workspace_id: workspace_id.into(),
            title: title.into(),
            base_ref: None,
            head_ref: None,
            status: "pending".to_string(),
            summary: None,
            config: None,
            created_at: now,
            completed_at: None,
            updated_at: now,
            synced_at: None,
        }
    }
}

/// Per-file result within a review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewFile {
    pub id: String,
    pub review_id: String,
    pub file_id: Option<String>,
    pub file_path: String,
    pub status: String,
    pub summary: Option<String>,
    pub issue_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl ReviewFile {
    pub fn new(review_id: impl Into<String>, file_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            review_id: review_id.into(),
            file_id: None,
            file_path: file_path.into(),
            status: "pending".to_string(),
            summary: None,
            issue_count: 0,
            created_at: now,
            updated_at: now,
            synced_at: None,
        }
    }
}

/// A single finding raised by a review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub review_id: String,
    pub review_file_id: Option<String>,
    pub file_path: String,
    pub line_start: Option<i64>,
    pub line_end: Option<i64>,
    pub severity: String,
    pub category: String,
    pub title: String,
    pub description: String,
    pub suggestion: Option<String>,
    /// Opaque JSON document attached by the reviewer.
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl Issue {
    pub fn new(
        review_id: impl Into<String>,
        file_path: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            review_id: review_id.into(),
            review_file_id: None,
            file_path: file_path.into(),
            line_start: None,
            line_end: None,
            severity: "info".to_string(),
            category: "general".to_string(),
            title: title.into(),
            description: String::new(),
            suggestion: None,
            metadata: None,
            created_at: now,
            updated_at: now,
            synced_at: None,
        }
    }
}

/// Any record the sync subsystem can push.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Workspace(Workspace),
    File(SourceFile),
    Review(Review),
    ReviewFile(ReviewFile),
    Issue(Issue),
}

impl Entity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Workspace(_) => EntityType::Workspace,
            Entity::File(_) => EntityType::File,
            Entity::Review(_) => EntityType::Review,
            Entity::ReviewFile(_) => EntityType::ReviewFile,
            Entity::Issue(_) => EntityType::Issue,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::Workspace(w) => &w.id,
            Entity::File(f) => &f.id,
            Entity::Review(r) => &r.id,
            Entity::ReviewFile(rf) => &rf.id,
            Entity::Issue(i) => &i.id,
        }
    }

    /// Foreign key used to scope candidate lookups.
    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Entity::Workspace(_) => None,
            Entity::File(f) => f.workspace_id.as_deref(),
            Entity::Review(r) => Some(&r.workspace_id),
            Entity::ReviewFile(rf) => Some(&rf.review_id),
            Entity::Issue(i) => Some(&i.review_id),
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Entity::Workspace(w) => w.updated_at,
            Entity::File(f) => f.updated_at,
            Entity::Review(r) => r.updated_at,
            Entity::ReviewFile(rf) => rf.updated_at,
            Entity::Issue(i) => i.updated_at,
        }
    }

    pub fn synced_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Entity::Workspace(w) => w.synced_at,
            Entity::File(f) => f.synced_at,
            Entity::Review(r) => r.synced_at,
            Entity::ReviewFile(rf) => rf.synced_at,
            Entity::Issue(i) => i.synced_at,
        }
    }

    pub(crate) fn set_updated_at(&mut self, at: DateTime<Utc>) {
        match self {
            Entity::Workspace(w) => w.updated_at = at,
            Entity::File(f) => f.updated_at = at,
            Entity::Review(r) => r.updated_at = at,
            Entity::ReviewFile(rf) => rf.updated_at = at,
            Entity::Issue(i) => i.updated_at = at,
        }
    }

    pub(crate) fn set_synced_at(&mut self, at: DateTime<Utc>) {
        match self {
            Entity::Workspace(w) => w.synced_at = Some(at),
            Entity::File(f) => f.synced_at = Some(at),
            Entity::Review(r) => r.synced_at = Some(at),
            Entity::ReviewFile(rf) => rf.synced_at = Some(at),
            Entity::Issue(i) => i.synced_at = Some(at),
        }
    }

    pub fn needs_sync(&self) -> bool {
        needs_sync(self.updated_at(), self.synced_at())
    }
}

/// One persisted push attempt. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLog {
    pub id: i64,
    pub sync_type: SyncType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub success: bool,
    pub error_type: Option<SyncErrorType>,
    pub error_message: Option<String>,
    pub items_synced: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// A push attempt about to be appended to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSyncLog {
    pub sync_type: SyncType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub success: bool,
    pub error_type: Option<SyncErrorType>,
    pub error_message: Option<String>,
    pub items_synced: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl NewSyncLog {
    /// A successful single-record push.
    pub fn success(
        sync_type: SyncType,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sync_type,
            entity_type,
            entity_id: entity_id.into(),
            success: true,
            error_type: None,
            error_message: None,
            items_synced: 1,
            started_at,
            completed_at,
        }
    }

    /// A failed push with its classification.
    pub fn failure(
        sync_type: SyncType,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        error_type: SyncErrorType,
        error_message: impl Into<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sync_type,
            entity_type,
            entity_id: entity_id.into(),
            success: false,
            error_type: Some(error_type),
            error_message: Some(error_message.into()),
            items_synced: 0,
            started_at,
            completed_at,
        }
    }

    pub(crate) fn into_log(self, id: i64) -> SyncLog {
        SyncLog {
            id,
            sync_type: self.sync_type,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            success: self.success,
            error_type: self.error_type,
            error_message: self.error_message,
            items_synced: self.items_synced,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_needs_sync_predicate() {
        let now = Utc::now();
        assert!(needs_sync(now, None));
        assert!(needs_sync(now, Some(now - Duration::seconds(1))));
        assert!(!needs_sync(now, Some(now)));
        assert!(!needs_sync(now, Some(now + Duration::seconds(1))));
    }

    #[test]
    fn test_millis_round_trip_truncates() {
        let now = Utc::now();
        let restored = from_millis(to_millis(now));
        assert_eq!(to_millis(restored), to_millis(now));
        assert!(now - restored < Duration::milliseconds(1));
    }

    #[test]
    fn test_entity_accessors() {
        let review = Review::new("ws-1", "Refactor parser");
        let id = review.id.clone();
        let entity = Entity::Review(review);

        assert_eq!(entity.entity_type(), EntityType::Review);
        assert_eq!(entity.id(), id);
        assert_eq!(entity.parent_id(), Some("ws-1"));
        assert!(entity.needs_sync());

        let orphan = Entity::File(SourceFile::new(None, "src/main.rs"));
        assert_eq!(orphan.parent_id(), None);
    }
}
