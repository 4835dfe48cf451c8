//! Wire DTOs for the push endpoints.
//!
//! Each DTO is a flat copy of the domain record minus local sync state.
//! Opaque JSON columns (metadata, config) are embedded as raw JSON without
//! being re-encoded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use reviewsync_common::EntityType;
use reviewsync_store::{Entity, Issue, Review, ReviewFile, SourceFile, Workspace};

use crate::error::RemoteError;

fn raw_json(
    entity_type: EntityType,
    field: &str,
    value: &Option<String>,
) -> Result<Option<Box<RawValue>>, RemoteError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => RawValue::from_string(text.to_string())
            .map(Some)
            .map_err(|e| RemoteError::Marshal {
                entity_type,
                message: format!("{} is not valid JSON: {}", field, e),
            }),
    }
}

#[derive(Debug, Serialize)]
pub struct WorkspaceDto {
    pub id: String,
    pub name: String,
    pub root_path: String,
    pub git_remote: Option<String>,
    pub metadata: Option<Box<RawValue>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkspaceDto {
    fn try_from_workspace(w: &Workspace) -> Result<Self, RemoteError> {
        Ok(Self {
            id: w.id.clone(),
            name: w.name.clone(),
            root_path: w.root_path.clone(),
            git_remote: w.git_remote.clone(),
            metadata: raw_json(EntityType::Workspace, "metadata", &w.metadata)?,
            created_at: w.created_at,
            updated_at: w.updated_at,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct FileDto {
    pub id: String,
    pub workspace_id: Option<String>,
    pub path: String,
    pub language: Option<String>,
    pub content_hash: Option<String>,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&SourceFile> for FileDto {
    fn from(f: &SourceFile) -> Self {
        Self {
            id: f.id.clone(),
            workspace_id: f.workspace_id.clone(),
            path: f.path.clone(),
            language: f.language.clone(),
            content_hash: f.content_hash.clone(),
            size_bytes: f.size_bytes,
            created_at: f.created_at,
            updated_at: f.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReviewDto {
    pub id: String,
    pub workspace_id: String,
    pub title: String,
    pub base_ref: Option<String>,
    pub head_ref: Option<String>,
    pub status: String,
    pub summary: Option<String>,
    pub config: Option<Box<RawValue>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ReviewDto {
    fn try_from_review(r: &Review) -> Result<Self, RemoteError> {
        Ok(Self {
            id: r.id.clone(),
            workspace_id: r.workspace_id.clone(),
            title: r.title.clone(),
            base_ref: r.base_ref.clone(),
            head_ref: r.head_ref.clone(),
            status: r.status.clone(),
            summary: r.summary.clone(),
            config: raw_json(EntityType::Review, "config", &r.config)?,
            created_at: r.created_at,
            completed_at: r.completed_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ReviewFileDto {
    pub id: String,
    pub review_id: String,
    pub file_id: Option<String>,
    pub file_path: String,
    pub status: String,
    pub summary: Option<String>,
    pub issue_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ReviewFile> for ReviewFileDto {
    fn from(rf: &ReviewFile) -> Self {
        Self {
            id: rf.id.clone(),
            review_id: rf.review_id.clone(),
            file_id: rf.file_id.clone(),
            file_path: rf.file_path.clone(),
            status: rf.status.clone(),
            summary: rf.summary.clone(),
            issue_count: rf.issue_count,
            created_at: rf.created_at,
            updated_at: rf.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IssueDto {
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
    pub metadata: Option<Box<RawValue>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IssueDto {
    fn try_from_issue(i: &Issue) -> Result<Self, RemoteError> {
        Ok(Self {
            id: i.id.clone(),
            review_id: i.review_id.clone(),
            review_file_id: i.review_file_id.clone(),
            file_path: i.file_path.clone(),
            line_start: i.line_start,
            line_end: i.line_end,
            severity: i.severity.clone(),
            category: i.category.clone(),
            title: i.title.clone(),
            description: i.description.clone(),
            suggestion: i.suggestion.clone(),
            metadata: raw_json(EntityType::Issue, "metadata", &i.metadata)?,
            created_at: i.created_at,
            updated_at: i.updated_at,
        })
    }
}

/// Body of a push request.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SyncPayload {
    Workspace(WorkspaceDto),
    File(FileDto),
    Review(ReviewDto),
    ReviewFile(ReviewFileDto),
    Issue(IssueDto),
}

impl SyncPayload {
    /// Build the DTO for a record.
    ///
    /// # Errors
    /// - `RemoteError::Marshal` if an opaque JSON column is not valid JSON
    pub fn from_entity(entity: &Entity) -> Result<Self, RemoteError> {
        Ok(match entity {
            Entity::Workspace(w) => SyncPayload::Workspace(WorkspaceDto::try_from_workspace(w)?),
            Entity::File(f) => SyncPayload::File(f.into()),
            Entity::Review(r) => SyncPayload::Review(ReviewDto::try_from_review(r)?),
            Entity::ReviewFile(rf) => SyncPayload::ReviewFile(rf.into()),
            Entity::Issue(i) => SyncPayload::Issue(IssueDto::try_from_issue(i)?),
        })
    }

    /// Encode as the request body.
    pub fn to_body(&self, entity_type: EntityType) -> Result<Vec<u8>, RemoteError> {
        serde_json::to_vec(self).map_err(|e| RemoteError::Marshal {
            entity_type,
            message: e.to_string(),
        })
    }
}

/// Body of a successful push response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Body of a failed response. The HTTP status line wins over any
/// `status_code` echoed in the body.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default, alias = "error")]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_json_passes_through_unchanged() {
        let mut workspace = Workspace::new("api", "/src/api");
        workspace.metadata = Some(r#"{"langs": ["rust","go"], "n":1.50}"#.to_string());

        let payload = SyncPayload::from_entity(&Entity::Workspace(workspace)).unwrap();
        let body = String::from_utf8(payload.to_body(EntityType::Workspace).unwrap()).unwrap();

        assert!(body.contains(r#""metadata":{"langs": ["rust","go"], "n":1.50}"#));
        assert!(!body.contains("synced_at"));
    }

    #[test]
    fn test_invalid_opaque_json_is_marshal_error() {
        let mut review = Review::new("ws", "title");
        review.config = Some("{not json".to_string());

        let err = SyncPayload::from_entity(&Entity::Review(review)).unwrap_err();
        assert!(err.is_marshal());
        assert!(err.to_string().contains("config"));
    }

    #[test]
    fn test_blank_opaque_json_is_omitted_as_null() {
        let mut issue = Issue::new("r", "a.rs", "t");
        issue.metadata = Some("  ".to_string());
        let payload = SyncPayload::from_entity(&Entity::Issue(issue)).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&payload.to_body(EntityType::Issue).unwrap()).unwrap();
        assert!(value["metadata"].is_null());
        assert_eq!(value["severity"], "info");
    }

    #[test]
    fn test_error_body_accepts_both_code_names() {
        let a: ErrorBody =
            serde_json::from_str(r#"{"status_code":422,"error_code":"invalid","message":"m"}"#)
                .unwrap();
        let b: ErrorBody =
            serde_json::from_str(r#"{"status_code":422,"error":"invalid","message":"m"}"#).unwrap();
        assert_eq!(a.error_code.as_deref(), Some("invalid"));
        assert_eq!(b.error_code.as_deref(), Some("invalid"));
    }
}
