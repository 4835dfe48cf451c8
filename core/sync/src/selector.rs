//! Candidate discovery.
//!
//! A record is a candidate when it needs sync or when its most recent push
//! attempt failed. Lookups are resolved stage by stage because child
//! queries are scoped by the parent candidates found before them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error};

use reviewsync_common::EntityType;
use reviewsync_store::SyncRepository;

use crate::retry::RetryExecutor;

/// Candidate IDs per entity type for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    candidates: BTreeMap<EntityType, BTreeSet<String>>,
}

impl SyncPlan {
    /// Candidates of one type.
    pub fn ids(&self, entity_type: EntityType) -> impl Iterator<Item = &String> + '_ {
        self.candidates
            .get(&entity_type)
            .into_iter()
            .flat_map(|ids| ids.iter())
    }

    /// Number of candidates of one type.
    pub fn count(&self, entity_type: EntityType) -> usize {
        self.candidates.get(&entity_type).map_or(0, BTreeSet::len)
    }

    /// Number of candidates across all types.
    pub fn total(&self) -> usize {
        self.candidates.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn contains(&self, entity_type: EntityType, id: &str) -> bool {
        self.candidates
            .get(&entity_type)
            .is_some_and(|ids| ids.contains(id))
    }

    pub(crate) fn insert(&mut self, entity_type: EntityType, ids: BTreeSet<String>) {
        self.candidates.entry(entity_type).or_default().extend(ids);
    }

    fn scope(&self, entity_type: EntityType) -> Vec<String> {
        self.ids(entity_type).cloned().collect()
    }
}

/// Finds the records a run should push.
pub struct EntitySelector {
    repo: Arc<dyn SyncRepository>,
    retry: Arc<RetryExecutor>,
    limit: usize,
}

impl EntitySelector {
    /// Create a selector capping each sub-query at `limit` rows.
    pub fn new(repo: Arc<dyn SyncRepository>, retry: Arc<RetryExecutor>, limit: usize) -> Self {
        Self { repo, retry, limit }
    }

    /// IDs needing sync, optionally restricted to children of `parents`.
    ///
    /// A failed lookup is logged and yields no IDs.
    pub async fn unsynced(&self, entity_type: EntityType, parents: Option<&[String]>) -> Vec<String> {
        let result = self
            .retry
            .execute(|| self.repo.unsynced_ids(entity_type, parents, self.limit))
            .await;

        match result {
            Ok(ids) => ids,
            Err(e) => {
                error!(
                    entity_type = %entity_type,
                    scoped = parents.is_some(),
                    "Failed to look up unsynced records: {}",
                    e
                );
                Vec::new()
            }
        }
    }

    /// IDs whose latest push attempt failed.
    ///
    /// A failed lookup is logged and yields no IDs.
    pub async fn failed(&self, entity_type: EntityType) -> Vec<String> {
        let result = self
            .retry
            .execute(|| self.repo.failed_ids(entity_type, self.limit))
            .await;

        match result {
            Ok(ids) => ids,
            Err(e) => {
                error!(entity_type = %entity_type, "Failed to look up failed sync logs: {}", e);
                Vec::new()
            }
        }
    }

    /// Unsynced ∪ failed for one type.
    ///
    /// With `parents`, unsynced records are looked up within that scope;
    /// `include_global` adds the unscoped lookup as well.
    pub async fn candidates(
        &self,
        entity_type: EntityType,
        parents: Option<&[String]>,
        include_global: bool,
    ) -> BTreeSet<String> {
        let mut ids: BTreeSet<String> = BTreeSet::new();

        ids.extend(self.unsynced(entity_type, parents).await);
        if parents.is_some() && include_global {
            ids.extend(self.unsynced(entity_type, None).await);
        }
        ids.extend(self.failed(entity_type).await);

        debug!(entity_type = %entity_type, count = ids.len(), "Resolved candidates");
        ids
    }

    /// Resolve candidates for every type in dependency order.
    ///
    /// Workspaces are global. Files are scoped to candidate workspaces plus
    /// the global lookup. Reviews are scoped to candidate workspaces only.
    /// Review files and issues are scoped to candidate reviews plus the
    /// global lookup. Failed records of every type are always included.
    pub async fn resolve_plan(&self) -> SyncPlan {
        let mut plan = SyncPlan::default();

        let workspaces = self.candidates(EntityType::Workspace, None, false).await;
        plan.insert(EntityType::Workspace, workspaces);
        let workspace_scope = plan.scope(EntityType::Workspace);

        let files = self
            .candidates(EntityType::File, Some(workspace_scope.as_slice()), true)
            .await;
        plan.insert(EntityType::File, files);

        let reviews = self
            .candidates(EntityType::Review, Some(workspace_scope.as_slice()), false)
            .await;
        plan.insert(EntityType::Review, reviews);
        let review_scope = plan.scope(EntityType::Review);

        for entity_type in [EntityType::ReviewFile, EntityType::Issue] {
            let ids = self
                .candidates(entity_type, Some(review_scope.as_slice()), true)
                .await;
            plan.insert(entity_type, ids);
        }

        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reviewsync_common::{SyncErrorType, SyncType};
    use reviewsync_store::{Entity, Issue, MemoryRepository, NewSyncLog, Review, Workspace};

    fn selector(repo: Arc<MemoryRepository>) -> EntitySelector {
        EntitySelector::new(repo, Arc::new(RetryExecutor::default()), 100)
    }

    async fn mark_synced(repo: &MemoryRepository, entity: &Entity) {
        repo.mark_synced(entity.entity_type(), entity.id(), Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_union_is_deduplicated() {
        let repo = Arc::new(MemoryRepository::new());
        let workspace = Workspace::new("api", "/src/api");
        repo.insert(Entity::Workspace(workspace.clone())).unwrap();
        let now = Utc::now();
        repo.record_log(&NewSyncLog::failure(
            SyncType::Manual,
            EntityType::Workspace,
            &workspace.id,
            SyncErrorType::Server,
            "HTTP 500",
            now,
            now,
        ))
        .await
        .unwrap();

        let ids = selector(repo)
            .candidates(EntityType::Workspace, None, false)
            .await;
        assert_eq!(ids.len(), 1);
        assert!(ids.contains(&workspace.id));
    }

    #[tokio::test]
    async fn test_review_scoped_to_candidate_workspaces() {
        let repo = Arc::new(MemoryRepository::new());
        let pending_ws = Workspace::new("pending", "/p");
        let synced_ws = Workspace::new("synced", "/s");
        let under_pending = Review::new(&pending_ws.id, "a");
        let under_synced = Review::new(&synced_ws.id, "b");
        for entity in [
            Entity::Workspace(pending_ws.clone()),
            Entity::Workspace(synced_ws.clone()),
            Entity::Review(under_pending.clone()),
            Entity::Review(under_synced.clone()),
        ] {
            repo.insert(entity).unwrap();
        }
        mark_synced(&repo, &Entity::Workspace(synced_ws)).await;

        let plan = selector(repo).resolve_plan().await;
        assert!(plan.contains(EntityType::Workspace, &pending_ws.id));
        assert!(plan.contains(EntityType::Review, &under_pending.id));
        assert!(!plan.contains(EntityType::Review, &under_synced.id));
    }

    #[tokio::test]
    async fn test_orphan_issues_found_through_global_lookup() {
        let repo = Arc::new(MemoryRepository::new());
        let review = Review::new("ws", "r");
        let issue = Issue::new(&review.id, "a.rs", "t");
        repo.insert(Entity::Review(review.clone())).unwrap();
        repo.insert(Entity::Issue(issue.clone())).unwrap();
        mark_synced(&repo, &Entity::Review(review)).await;

        let plan = selector(repo).resolve_plan().await;
        assert_eq!(plan.count(EntityType::Review), 0);
        assert!(plan.contains(EntityType::Issue, &issue.id));
        assert_eq!(plan.total(), 1);
    }

    #[tokio::test]
    async fn test_empty_store_yields_empty_plan() {
        let plan = selector(Arc::new(MemoryRepository::new()))
            .resolve_plan()
            .await;
        assert!(plan.is_empty());
    }
}
