//! Common types used throughout ReviewSync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// The five kinds of domain record mirrored to the server.
///
/// Variants are declared in dependency order: a record's parent always
/// appears before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Workspace,
    File,
    Review,
    ReviewFile,
    Issue,
}

impl EntityType {
    /// All entity types in dependency order.
    pub const ALL: [EntityType; 5] = [
        EntityType::Workspace,
        EntityType::File,
        EntityType::Review,
        EntityType::ReviewFile,
        EntityType::Issue,
    ];

    /// Stable identifier stored in `sync_logs.entity_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Workspace => "workspace",
            EntityType::File => "file",
            EntityType::Review => "review",
            EntityType::ReviewFile => "review_file",
            EntityType::Issue => "issue",
        }
    }

    /// Final path segment of the push endpoint, `/api/sync/{segment}`.
    pub fn endpoint(&self) -> &'static str {
        match self {
            EntityType::Workspace => "workspace",
            EntityType::File => "file",
            EntityType::Review => "review",
            EntityType::ReviewFile => "review-file",
            EntityType::Issue => "issue",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workspace" => Ok(EntityType::Workspace),
            "file" => Ok(EntityType::File),
            "review" => Ok(EntityType::Review),
            "review_file" | "review-file" => Ok(EntityType::ReviewFile),
            "issue" => Ok(EntityType::Issue),
            other => Err(Error::InvalidInput(format!("Unknown entity type: {}", other))),
        }
    }
}

/// What triggered a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    /// Operator asked for a sync.
    Manual,
    /// Sync triggered when a review finished.
    PostReview,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Manual => "manual",
            SyncType::PostReview => "post_review",
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(SyncType::Manual),
            "post_review" => Ok(SyncType::PostReview),
            other => Err(Error::InvalidInput(format!("Unknown sync type: {}", other))),
        }
    }
}

/// Classification of a failed push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorType {
    /// No response was received.
    Network,
    /// HTTP 401 or 403.
    Auth,
    /// HTTP 5xx.
    Server,
    /// Any other HTTP 4xx, or a local failure before or after the request.
    Client,
    /// Anything else.
    Unknown,
}

impl SyncErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorType::Network => "network",
            SyncErrorType::Auth => "auth",
            SyncErrorType::Server => "server",
            SyncErrorType::Client => "client",
            SyncErrorType::Unknown => "unknown",
        }
    }

    /// Classify an HTTP status code that was not a success.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => SyncErrorType::Auth,
            500..=599 => SyncErrorType::Server,
            400..=499 => SyncErrorType::Client,
            _ => SyncErrorType::Unknown,
        }
    }
}

impl fmt::Display for SyncErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncErrorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network" => Ok(SyncErrorType::Network),
            "auth" => Ok(SyncErrorType::Auth),
            "server" => Ok(SyncErrorType::Server),
            "client" => Ok(SyncErrorType::Client),
            "unknown" => Ok(SyncErrorType::Unknown),
            other => Err(Error::InvalidInput(format!("Unknown error type: {}", other))),
        }
    }
}
