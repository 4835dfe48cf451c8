//! Run-level outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use reviewsync_common::{EntityType, SyncErrorType, SyncType};

use crate::error::SyncError;

/// Counts for one entity type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeStats {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
}

/// Aggregate result of a reconciliation run.
///
/// The first failure seen is kept as the headline error; later failures
/// only affect the counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub sync_type: SyncType,
    pub started_at: DateTime<Utc>,
    pub total_items: u64,
    pub success_items: u64,
    pub failed_items: u64,
    pub success: bool,
    pub by_type: BTreeMap<EntityType, TypeStats>,
    pub error_type: Option<SyncErrorType>,
    pub error_message: Option<String>,
    pub duration: Duration,
    /// The run stopped before every candidate was attempted.
    pub cancelled: bool,
}

impl SyncResult {
    pub fn new(sync_type: SyncType) -> Self {
        Self {
            sync_type,
            started_at: Utc::now(),
            total_items: 0,
            success_items: 0,
            failed_items: 0,
            success: true,
            by_type: BTreeMap::new(),
            error_type: None,
            error_message: None,
            duration: Duration::ZERO,
            cancelled: false,
        }
    }

    pub fn record_success(&mut self, entity_type: EntityType) {
        let stats = self.by_type.entry(entity_type).or_default();
        stats.total += 1;
        stats.success += 1;
        self.total_items += 1;
        self.success_items += 1;
    }

    pub fn record_failure(&mut self, entity_type: EntityType, err: &SyncError) {
        let stats = self.by_type.entry(entity_type).or_default();
        stats.total += 1;
        stats.failed += 1;
        self.total_items += 1;
        self.failed_items += 1;
        self.success = false;

        if self.error_message.is_none() {
            self.error_type = Some(err.error_type());
            self.error_message = Some(err.to_string());
        }
    }

    /// Fold one push outcome.
    pub fn record(&mut self, entity_type: EntityType, outcome: &Result<(), SyncError>) {
        match outcome {
            Ok(()) => self.record_success(entity_type),
            Err(err) => self.record_failure(entity_type, err),
        }
    }

    /// Counts for one type.
    pub fn stats(&self, entity_type: EntityType) -> TypeStats {
        self.by_type.get(&entity_type).copied().unwrap_or_default()
    }

    pub(crate) fn finish(&mut self, duration: Duration, cancelled: bool) {
        self.duration = duration;
        self.cancelled = cancelled;
        self.success = self.failed_items == 0;
    }
}
