//! Transport failures and their wire classification.

use thiserror::Error;

use reviewsync_common::{EntityType, SyncErrorType};

/// A failed call to the sync server.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The record could not be encoded as its wire DTO.
    #[error("Failed to encode {entity_type} payload: {message}")]
    Marshal {
        entity_type: EntityType,
        message: String,
    },

    /// No HTTP response was received (refused, reset, timed out).
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The server answered 2xx but reported `success: false`.
    #[error("Server rejected payload: {0}")]
    Rejected(String),

    /// A success response body could not be decoded.
    #[error("Invalid response (HTTP {status}): {message}")]
    Decode { status: u16, message: String },

    /// No bearer token is configured.
    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    /// Server URL missing or malformed, or settings unreadable.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RemoteError {
    /// Classification recorded in the sync log.
    pub fn error_type(&self) -> SyncErrorType {
        match self {
            RemoteError::Network(_) => SyncErrorType::Network,
            RemoteError::Http { status, .. } => SyncErrorType::from_status(*status),
            RemoteError::Unauthenticated(_) => SyncErrorType::Auth,
            RemoteError::Marshal { .. } | RemoteError::Config(_) => SyncErrorType::Client,
            RemoteError::Rejected(_) | RemoteError::Decode { .. } => SyncErrorType::Unknown,
        }
    }

    /// HTTP status, when a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Http { status, .. } | RemoteError::Decode { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_marshal(&self) -> bool {
        matches!(self, RemoteError::Marshal { .. })
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> RemoteError {
        RemoteError::Http {
            status,
            code: None,
            message: String::new(),
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(http(401).error_type(), SyncErrorType::Auth);
        assert_eq!(http(403).error_type(), SyncErrorType::Auth);
        assert_eq!(http(503).error_type(), SyncErrorType::Server);
        assert_eq!(http(422).error_type(), SyncErrorType::Client);
        assert_eq!(
            RemoteError::Network("connection refused".into()).error_type(),
            SyncErrorType::Network
        );
        assert_eq!(
            RemoteError::Rejected("duplicate".into()).error_type(),
            SyncErrorType::Unknown
        );
        assert_eq!(
            RemoteError::Unauthenticated("no token".into()).error_type(),
            SyncErrorType::Auth
        );
    }

    #[test]
    fn test_marshal_is_client_flavored() {
        let err = RemoteError::Marshal {
            entity_type: EntityType::Issue,
            message: "bad json".into(),
        };
        assert!(err.is_marshal());
        assert_eq!(err.error_type(), SyncErrorType::Client);
        assert_eq!(err.status(), None);
        assert!(err.to_string().contains("issue"));
    }
}
