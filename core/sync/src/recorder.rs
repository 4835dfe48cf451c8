//! Audit log writes and `synced_at` updates.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::error;

use reviewsync_common::{EntityType, SyncType};
use reviewsync_store::{NewSyncLog, SyncRepository};

use crate::error::SyncError;
use crate::retry::RetryExecutor;

/// Appends one row per push attempt.
///
/// A log write that still fails after busy retries is reported and
/// dropped; it never changes the outcome of the push it describes.
pub struct SyncLogRecorder {
    repo: Arc<dyn SyncRepository>,
    retry: Arc<RetryExecutor>,
}

impl SyncLogRecorder {
    pub fn new(repo: Arc<dyn SyncRepository>, retry: Arc<RetryExecutor>) -> Self {
        Self { repo, retry }
    }

    async fn append(&self, log: NewSyncLog) -> Option<i64> {
        match self.retry.execute(|| self.repo.record_log(&log)).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(
                    entity_type = %log.entity_type,
                    entity_id = %log.entity_id,
                    success = log.success,
                    "Failed to write sync log: {}",
                    e
                );
                None
            }
        }
    }

    /// Record an accepted push.
    pub async fn record_success(
        &self,
        sync_type: SyncType,
        entity_type: EntityType,
        id: &str,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Option<i64> {
        self.append(NewSyncLog::success(
            sync_type,
            entity_type,
            id,
            started_at,
            completed_at,
        ))
        .await
    }

    /// Record a failed attempt with its classification.
    pub async fn record_failure(
        &self,
        sync_type: SyncType,
        entity_type: EntityType,
        id: &str,
        err: &SyncError,
        started_at: DateTime<Utc>,
    ) -> Option<i64> {
        self.append(NewSyncLog::failure(
            sync_type,
            entity_type,
            id,
            err.error_type(),
            err.to_string(),
            started_at,
            Utc::now(),
        ))
        .await
    }
}

/// Writes `synced_at` after a successful push.
pub struct StatusUpdater {
    repo: Arc<dyn SyncRepository>,
    retry: Arc<RetryExecutor>,
}

impl StatusUpdater {
    pub fn new(repo: Arc<dyn SyncRepository>, retry: Arc<RetryExecutor>) -> Self {
        Self { repo, retry }
    }

    /// Mark the record as synced at `at`.
    ///
    /// # Errors
    /// - `SyncError::StatusUpdate` if the store rejects the write
    pub async fn mark_synced(
        &self,
        entity_type: EntityType,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        self.retry
            .execute(|| self.repo.mark_synced(entity_type, id, at))
            .await
            .map_err(|source| SyncError::StatusUpdate {
                entity_type,
                id: id.to_string(),
                source,
            })
    }
}
