//! Per-record sync failures.

use thiserror::Error;

use reviewsync_common::{EntityType, Error as StoreError, SyncErrorType};
use reviewsync_remote::RemoteError;

/// Why a single record did not reach a synced state.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The transport call failed or the server refused the record.
    #[error(transparent)]
    Remote(RemoteError),

    /// The record disappeared between selection and push.
    #[error("{entity_type} {id} not found")]
    EntityNotFound { entity_type: EntityType, id: String },

    /// The record could not be encoded for the wire.
    #[error("Failed to encode {entity_type} {id}: {message}")]
    Marshal {
        entity_type: EntityType,
        id: String,
        message: String,
    },

    /// The push succeeded but `synced_at` could not be written.
    #[error("Pushed {entity_type} {id} but failed to update sync status: {source}")]
    StatusUpdate {
        entity_type: EntityType,
        id: String,
        #[source]
        source: StoreError,
    },

    /// The local store failed while loading the record.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Wrap a transport error, pulling encoding failures out as `Marshal`.
    pub fn from_remote(err: RemoteError, id: &str) -> Self {
        match err {
            RemoteError::Marshal {
                entity_type,
                message,
            } => SyncError::Marshal {
                entity_type,
                id: id.to_string(),
                message,
            },
            other => SyncError::Remote(other),
        }
    }

    /// Classification recorded in the sync log and the run result.
    ///
    /// Local failures are reported as `client`.
    pub fn error_type(&self) -> SyncErrorType {
        match self {
            SyncError::Remote(err) => err.error_type(),
            _ => SyncErrorType::Client,
        }
    }

    /// Whether the server accepted the record despite this error.
    pub fn is_semi_success(&self) -> bool {
        matches!(self, SyncError::StatusUpdate { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marshal_split_out_of_remote() {
        let err = SyncError::from_remote(
            RemoteError::Marshal {
                entity_type: EntityType::Review,
                message: "config is not valid JSON".into(),
            },
            "r1",
        );
        assert!(matches!(err, SyncError::Marshal { ref id, .. } if id == "r1"));
        assert_eq!(err.error_type(), SyncErrorType::Client);
    }

    #[test]
    fn test_remote_keeps_wire_classification() {
        let err = SyncError::from_remote(
            RemoteError::Http {
                status: 503,
                code: None,
                message: "HTTP 503 Service Unavailable".into(),
            },
            "i1",
        );
        assert_eq!(err.error_type(), SyncErrorType::Server);
        assert_eq!(err.to_string(), "HTTP 503: HTTP 503 Service Unavailable");
    }

    #[test]
    fn test_local_failures_are_client() {
        let missing = SyncError::EntityNotFound {
            entity_type: EntityType::Issue,
            id: "gone".into(),
        };
        let status = SyncError::StatusUpdate {
            entity_type: EntityType::Issue,
            id: "i1".into(),
            source: StoreError::Database("disk I/O error".into()),
        };
        assert_eq!(missing.error_type(), SyncErrorType::Client);
        assert_eq!(status.error_type(), SyncErrorType::Client);
        assert!(status.is_semi_success());
        assert!(!missing.is_semi_success());
    }
}
