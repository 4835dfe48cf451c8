//! Reconciliation engine that pushes pending records to the sync server.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use reviewsync_common::{EntityType, SyncType};
use reviewsync_remote::SyncTransport;
use reviewsync_store::{Entity, SyncRepository};

use crate::error::SyncError;
use crate::recorder::{StatusUpdater, SyncLogRecorder};
use crate::result::SyncResult;
use crate::retry::{RetryConfig, RetryExecutor};
use crate::selector::{EntitySelector, SyncPlan};

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Row cap for each candidate sub-query.
    pub batch_limit: usize,
    /// In-flight pushes allowed within one entity type. 1 is sequential.
    pub max_concurrency: usize,
    /// Wall-clock budget for a whole run.
    pub run_timeout: Duration,
    /// Retries for a busy local store.
    pub busy_retries: u32,
    /// First backoff delay for a busy local store.
    pub busy_initial_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_limit: 1000,
            max_concurrency: 1,
            run_timeout: Duration::from_secs(600),
            busy_retries: 5,
            busy_initial_delay: Duration::from_millis(50),
        }
    }
}

/// Main engine coordinating reconciliation runs.
pub struct SyncEngine {
    /// Local store.
    repo: Arc<dyn SyncRepository>,
    /// Remote side.
    transport: Arc<dyn SyncTransport>,
    selector: EntitySelector,
    recorder: SyncLogRecorder,
    updater: StatusUpdater,
    retry: Arc<RetryExecutor>,
    config: SyncConfig,
}

impl SyncEngine {
    /// Create a new sync engine.
    pub fn new(
        repo: Arc<dyn SyncRepository>,
        transport: Arc<dyn SyncTransport>,
        config: SyncConfig,
    ) -> Self {
        let retry = Arc::new(RetryExecutor::new(
            RetryConfig::new(config.busy_retries).with_initial_delay(config.busy_initial_delay),
        ));

        Self {
            selector: EntitySelector::new(repo.clone(), retry.clone(), config.batch_limit),
            recorder: SyncLogRecorder::new(repo.clone(), retry.clone()),
            updater: StatusUpdater::new(repo.clone(), retry.clone()),
            repo,
            transport,
            retry,
            config,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Candidate discovery without pushing anything.
    pub async fn plan(&self) -> SyncPlan {
        self.selector.resolve_plan().await
    }

    /// Check the configured token against the server.
    pub async fn verify_token(&self) -> Result<bool, SyncError> {
        self.transport
            .verify_token()
            .await
            .map_err(SyncError::Remote)
    }

    /// Run a full reconciliation.
    ///
    /// Every candidate is attempted once regardless of earlier failures.
    /// Cancelling `cancel`, or exceeding the run timeout, stops new pushes;
    /// a push already in flight completes and is recorded.
    pub async fn run(&self, sync_type: SyncType, cancel: CancellationToken) -> SyncResult {
        let started = Instant::now();
        let mut result = SyncResult::new(sync_type);
        let (token, deadline) = self.run_token(&cancel);

        info!("Starting {} sync run", sync_type);
        let plan = self.selector.resolve_plan().await;
        debug!(candidates = plan.total(), "Resolved sync plan");

        self.push_plan(sync_type, &plan, &token, &mut result).await;

        deadline.abort();
        result.finish(started.elapsed(), token.is_cancelled());
        self.log_finished(&result);
        result
    }

    /// Push one review and its pending children right after it completes.
    ///
    /// The review is pushed even if it is already marked synced. Its
    /// workspace is pushed first when it needs sync.
    ///
    /// # Errors
    /// - `SyncError::EntityNotFound` if the review does not exist
    /// - `SyncError::Store` if the review cannot be loaded
    pub async fn sync_review(
        &self,
        review_id: &str,
        cancel: CancellationToken,
    ) -> Result<SyncResult, SyncError> {
        let started = Instant::now();
        let review = self
            .load(EntityType::Review, review_id)
            .await?
            .ok_or_else(|| SyncError::EntityNotFound {
                entity_type: EntityType::Review,
                id: review_id.to_string(),
            })?;

        let mut plan = SyncPlan::default();
        if let Some(workspace_id) = review.parent_id() {
            match self.load(EntityType::Workspace, workspace_id).await {
                Ok(Some(workspace)) if workspace.needs_sync() => {
                    plan.insert(EntityType::Workspace, BTreeSet::from([workspace_id.to_string()]));
                }
                Ok(_) => {}
                Err(err) => {
                    error!(review_id, workspace_id, "Workspace lookup failed: {}", err);
                }
            }
        }
        plan.insert(EntityType::Review, BTreeSet::from([review_id.to_string()]));

        let scope = [review_id.to_string()];
        for entity_type in [EntityType::ReviewFile, EntityType::Issue] {
            let ids = self.selector.unsynced(entity_type, Some(&scope[..])).await;
            plan.insert(entity_type, ids.into_iter().collect());
        }

        let sync_type = SyncType::PostReview;
        let mut result = SyncResult::new(sync_type);
        let (token, deadline) = self.run_token(&cancel);

        info!(review_id, candidates = plan.total(), "Starting post-review sync");
        self.push_plan(sync_type, &plan, &token, &mut result).await;

        deadline.abort();
        result.finish(started.elapsed(), token.is_cancelled());
        self.log_finished(&result);
        Ok(result)
    }

    /// Push, log and mark one record.
    ///
    /// `synced_at` is set to the time the record was loaded, so a local edit
    /// made while the push is in flight keeps the record a candidate.
    ///
    /// # Errors
    /// Every failure is logged before it is returned. A
    /// `SyncError::StatusUpdate` means the server accepted the record and
    /// the log says so, but `synced_at` was not written.
    pub async fn sync_one(
        &self,
        sync_type: SyncType,
        entity_type: EntityType,
        id: &str,
    ) -> Result<(), SyncError> {
        let started_at = Utc::now();

        let entity = match self.load(entity_type, id).await {
            Ok(Some(entity)) => entity,
            Ok(None) => {
                let err = SyncError::EntityNotFound {
                    entity_type,
                    id: id.to_string(),
                };
                return Err(self.fail(sync_type, entity_type, id, err, started_at).await);
            }
            Err(err) => return Err(self.fail(sync_type, entity_type, id, err, started_at).await),
        };

        if let Err(e) = self.transport.push(&entity).await {
            let err = SyncError::from_remote(e, id);
            return Err(self.fail(sync_type, entity_type, id, err, started_at).await);
        }

        let completed_at = Utc::now();
        self.recorder
            .record_success(sync_type, entity_type, id, started_at, completed_at)
            .await;
        debug!(entity_type = %entity_type, entity_id = id, "Pushed record");

        if let Err(err) = self.updater.mark_synced(entity_type, id, started_at).await {
            warn!(entity_type = %entity_type, entity_id = id, "{}", err);
            return Err(err);
        }
        Ok(())
    }

    async fn fail(
        &self,
        sync_type: SyncType,
        entity_type: EntityType,
        id: &str,
        err: SyncError,
        started_at: chrono::DateTime<Utc>,
    ) -> SyncError {
        warn!(
            entity_type = %entity_type,
            entity_id = id,
            error_type = %err.error_type(),
            "Sync failed: {}",
            err
        );
        self.recorder
            .record_failure(sync_type, entity_type, id, &err, started_at)
            .await;
        err
    }

    async fn load(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>, SyncError> {
        self.retry
            .execute(|| self.repo.load_entity(entity_type, id))
            .await
            .map_err(SyncError::Store)
    }

    /// Push every candidate in the plan, one entity type at a time.
    async fn push_plan(
        &self,
        sync_type: SyncType,
        plan: &SyncPlan,
        cancel: &CancellationToken,
        result: &mut SyncResult,
    ) {
        let concurrency = self.config.max_concurrency.max(1);

        for entity_type in EntityType::ALL {
            if cancel.is_cancelled() {
                break;
            }
            if plan.count(entity_type) == 0 {
                continue;
            }

            let mut outcomes = pin!(stream::iter(plan.ids(entity_type))
                .take_until(cancel.cancelled())
                .map(|id| async move { self.sync_one(sync_type, entity_type, id).await })
                .buffer_unordered(concurrency));

            while let Some(outcome) = outcomes.next().await {
                result.record(entity_type, &outcome);
            }
        }
    }

    /// Child token that is also cancelled when the run timeout elapses.
    fn run_token(&self, cancel: &CancellationToken) -> (CancellationToken, JoinHandle<()>) {
        let token = cancel.child_token();
        let timer = token.clone();
        let timeout = self.config.run_timeout;
        let deadline = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    warn!("Sync run exceeded {:?}, stopping", timeout);
                    timer.cancel();
                }
                _ = timer.cancelled() => {}
            }
        });
        (token, deadline)
    }

    fn log_finished(&self, result: &SyncResult) {
        if result.success {
            info!(
                total = result.total_items,
                cancelled = result.cancelled,
                "Sync run completed in {:?}",
                result.duration
            );
        } else {
            warn!(
                total = result.total_items,
                failed = result.failed_items,
                cancelled = result.cancelled,
                "Sync run completed with failures in {:?}: {}",
                result.duration,
                result.error_message.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reviewsync_remote::{RemoteError, SyncResponse};
    use chrono::DateTime;
    use reviewsync_store::{MemoryRepository, NewSyncLog, Review, Workspace};
    use std::sync::Mutex;

    /// Accepts everything and remembers what it saw.
    #[derive(Default)]
    struct AcceptAll {
        pushed: Mutex<Vec<(EntityType, String)>>,
    }

    #[async_trait]
    impl SyncTransport for AcceptAll {
        async fn push(&self, entity: &Entity) -> Result<SyncResponse, RemoteError> {
            self.pushed
                .lock()
                .unwrap()
                .push((entity.entity_type(), entity.id().to_string()));
            Ok(SyncResponse {
                success: true,
                ..SyncResponse::default()
            })
        }

        async fn verify_token(&self) -> Result<bool, RemoteError> {
            Ok(true)
        }
    }

    /// Delegates to a memory repository but cannot read workspaces.
    struct WorkspaceReadFails(MemoryRepository);

    #[async_trait]
    impl SyncRepository for WorkspaceReadFails {
        async fn unsynced_ids(
            &self,
            entity_type: EntityType,
            parents: Option<&[String]>,
            limit: usize,
        ) -> reviewsync_common::Result<Vec<String>> {
            self.0.unsynced_ids(entity_type, parents, limit).await
        }

        async fn failed_ids(
            &self,
            entity_type: EntityType,
            limit: usize,
        ) -> reviewsync_common::Result<Vec<String>> {
            self.0.failed_ids(entity_type, limit).await
        }

        async fn load_entity(
            &self,
            entity_type: EntityType,
            id: &str,
        ) -> reviewsync_common::Result<Option<Entity>> {
            if entity_type == EntityType::Workspace {
                return Err(reviewsync_common::Error::Database("disk I/O error".to_string()));
            }
            self.0.load_entity(entity_type, id).await
        }

        async fn record_log(&self, log: &NewSyncLog) -> reviewsync_common::Result<i64> {
            self.0.record_log(log).await
        }

        async fn mark_synced(
            &self,
            entity_type: EntityType,
            id: &str,
            at: DateTime<Utc>,
        ) -> reviewsync_common::Result<()> {
            self.0.mark_synced(entity_type, id, at).await
        }
    }

    fn engine(repo: Arc<MemoryRepository>, transport: Arc<AcceptAll>) -> SyncEngine {
        SyncEngine::new(repo, transport, SyncConfig::default())
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.batch_limit, 1000);
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.run_timeout, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_pushes_in_dependency_order() {
        let repo = Arc::new(MemoryRepository::new());
        let workspace = Workspace::new("api", "/src/api");
        let review = Review::new(&workspace.id, "r");
        repo.insert(Entity::Review(review.clone())).unwrap();
        repo.insert(Entity::Workspace(workspace.clone())).unwrap();

        let transport = Arc::new(AcceptAll::default());
        let result = engine(repo, transport.clone())
            .run(SyncType::Manual, CancellationToken::new())
            .await;

        assert!(result.success);
        let pushed = transport.pushed.lock().unwrap().clone();
        assert_eq!(
            pushed,
            vec![
                (EntityType::Workspace, workspace.id.clone()),
                (EntityType::Review, review.id.clone()),
            ]
        );
    }

    #[tokio::test]
    async fn test_semi_success_logs_success_but_fails_run() {
        let repo = Arc::new(MemoryRepository::new());
        let workspace = Workspace::new("api", "/src/api");
        repo.insert(Entity::Workspace(workspace.clone())).unwrap();
        repo.set_fail_mark_synced(true);

        let result = engine(repo.clone(), Arc::new(AcceptAll::default()))
            .run(SyncType::Manual, CancellationToken::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.failed_items, 1);
        let logs = repo.logs().unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].success);
        let stored = repo
            .get(EntityType::Workspace, &workspace.id)
            .unwrap()
            .unwrap();
        assert!(stored.synced_at().is_none());
    }

    #[tokio::test]
    async fn test_missing_entity_is_logged_as_client_failure() {
        let repo = Arc::new(MemoryRepository::new());
        let engine = engine(repo.clone(), Arc::new(AcceptAll::default()));

        let err = engine
            .sync_one(SyncType::Manual, EntityType::Issue, "vanished")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::EntityNotFound { .. }));

        let logs = repo.logs().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(
            logs[0].error_type,
            Some(reviewsync_common::SyncErrorType::Client)
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_pushes_nothing() {
        let repo = Arc::new(MemoryRepository::new());
        repo.insert(Entity::Workspace(Workspace::new("api", "/src/api")))
            .unwrap();
        let transport = Arc::new(AcceptAll::default());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = engine(repo, transport.clone())
            .run(SyncType::Manual, cancel)
            .await;

        assert!(result.cancelled);
        assert_eq!(result.total_items, 0);
        assert!(transport.pushed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_review_missing_review() {
        let engine = engine(
            Arc::new(MemoryRepository::new()),
            Arc::new(AcceptAll::default()),
        );
        let err = engine
            .sync_review("nope", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::EntityNotFound { .. }));
    }

    #[tokio::test]
    async fn test_sync_review_survives_workspace_lookup_error() {
        let inner = MemoryRepository::new();
        let workspace = Workspace::new("api", "/src/api");
        let review = Review::new(&workspace.id, "r");
        inner.insert(Entity::Workspace(workspace)).unwrap();
        inner.insert(Entity::Review(review.clone())).unwrap();

        let transport = Arc::new(AcceptAll::default());
        let engine = SyncEngine::new(
            Arc::new(WorkspaceReadFails(inner)),
            transport.clone(),
            SyncConfig::default(),
        );
        let result = engine
            .sync_review(&review.id, CancellationToken::new())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.total_items, 1);
        let pushed = transport.pushed.lock().unwrap().clone();
        assert_eq!(pushed, vec![(EntityType::Review, review.id.clone())]);
    }
}
