//! In-memory repository for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use reviewsync_common::{EntityType, Error, Result};

use crate::models::{from_millis, to_millis, Entity, NewSyncLog, SyncLog};
use crate::repository::{SettingsStore, SyncRepository};

#[derive(Default)]
struct MemoryState {
    entities: HashMap<(EntityType, String), Entity>,
    logs: Vec<SyncLog>,
    settings: HashMap<String, String>,
}

/// In-memory implementation of the store traits.
///
/// Useful for testing the sync engine without SQLite. Failed-log selection
/// uses a plain scan over the sorted log, keeping the first row seen per
/// entity. `fail_mark_synced` makes every status update fail.
#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<MemoryState>,
    fail_mark_synced: AtomicBool,
}

impl MemoryRepository {
    /// Create a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| Error::Database("Memory state poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| Error::Database("Memory state poisoned".to_string()))
    }

    /// Insert or replace a record.
    pub fn insert(&self, entity: Entity) -> Result<()> {
        let key = (entity.entity_type(), entity.id().to_string());
        self.write()?.entities.insert(key, entity);
        Ok(())
    }

    /// Fetch a copy of a record.
    pub fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>> {
        Ok(self
            .read()?
            .entities
            .get(&(entity_type, id.to_string()))
            .cloned())
    }

    /// Delete a record. Children are not cascaded.
    pub fn remove(&self, entity_type: EntityType, id: &str) -> Result<()> {
        self.write()?
            .entities
            .remove(&(entity_type, id.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("{} {}", entity_type, id)))
    }

    /// Record a local mutation.
    pub fn touch(&self, entity_type: EntityType, id: &str) -> Result<()> {
        let mut state = self.write()?;
        let entity = state
            .entities
            .get_mut(&(entity_type, id.to_string()))
            .ok_or_else(|| Error::NotFound(format!("{} {}", entity_type, id)))?;

        let floor = entity
            .synced_at()
            .map(to_millis)
            .unwrap_or(0)
            .max(to_millis(entity.updated_at()))
            + 1;
        let now = to_millis(Utc::now()).max(floor);
        entity.set_updated_at(from_millis(now));
        Ok(())
    }

    /// All log rows in insertion order.
    pub fn logs(&self) -> Result<Vec<SyncLog>> {
        Ok(self.read()?.logs.clone())
    }

    /// Make subsequent `mark_synced` calls fail.
    pub fn set_fail_mark_synced(&self, fail: bool) {
        self.fail_mark_synced.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SyncRepository for MemoryRepository {
    async fn unsynced_ids(
        &self,
        entity_type: EntityType,
        parents: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<String>> {
        if entity_type == EntityType::Workspace && parents.is_some() {
            return Err(Error::InvalidInput(format!(
                "{} records have no parent scope",
                entity_type
            )));
        }
        let scope: Option<HashSet<&str>> =
            parents.map(|p| p.iter().map(String::as_str).collect());

        let state = self.read()?;
        let mut found: Vec<&Entity> = state
            .entities
            .values()
            .filter(|e| e.entity_type() == entity_type && e.needs_sync())
            .filter(|e| match &scope {
                None => true,
                Some(scope) => e.parent_id().is_some_and(|p| scope.contains(p)),
            })
            .collect();

        found.sort_by(|a, b| {
            b.updated_at()
                .cmp(&a.updated_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(found
            .into_iter()
            .take(limit)
            .map(|e| e.id().to_string())
            .collect())
    }

    async fn failed_ids(&self, entity_type: EntityType, limit: usize) -> Result<Vec<String>> {
        let state = self.read()?;
        let mut logs: Vec<&SyncLog> = state
            .logs
            .iter()
            .filter(|l| l.entity_type == entity_type)
            .collect();
        logs.sort_by(|a, b| {
            b.completed_at
                .cmp(&a.completed_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let mut seen = HashSet::new();
        let mut failed = Vec::new();
        for log in logs {
            if failed.len() >= limit {
                break;
            }
            if !seen.insert(log.entity_id.as_str()) {
                continue;
            }
            let exists = state
                .entities
                .contains_key(&(entity_type, log.entity_id.clone()));
            if !log.success && exists {
                failed.push(log.entity_id.clone());
            }
        }
        Ok(failed)
    }

    async fn load_entity(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>> {
        self.get(entity_type, id)
    }

    async fn record_log(&self, log: &NewSyncLog) -> Result<i64> {
        let mut state = self.write()?;
        let id = state.logs.len() as i64 + 1;
        state.logs.push(log.clone().into_log(id));
        Ok(id)
    }

    async fn mark_synced(
        &self,
        entity_type: EntityType,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if self.fail_mark_synced.load(Ordering::SeqCst) {
            return Err(Error::Database(format!(
                "injected failure marking {} {} synced",
                entity_type, id
            )));
        }

        let mut state = self.write()?;
        let entity = state
            .entities
            .get_mut(&(entity_type, id.to_string()))
            .ok_or_else(|| Error::NotFound(format!("{} {}", entity_type, id)))?;
        let advances = entity
            .synced_at()
            .map_or(true, |current| to_millis(current) < to_millis(at));
        if advances {
            entity.set_synced_at(at);
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemoryRepository {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.write()?
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Issue, Review, Workspace};
    use chrono::Duration;
    use reviewsync_common::{SyncErrorType, SyncType};

    #[tokio::test]
    async fn test_unsynced_scoped_by_parent() {
        let repo = MemoryRepository::new();
        let review = Review::new("ws-1", "r");
        let inside = Issue::new(&review.id, "a.rs", "one");
        let outside = Issue::new("another-review", "b.rs", "two");
        repo.insert(Entity::Review(review.clone())).unwrap();
        repo.insert(Entity::Issue(inside.clone())).unwrap();
        repo.insert(Entity::Issue(outside.clone())).unwrap();

        let parents = vec![review.id.clone()];
        let scoped = repo
            .unsynced_ids(EntityType::Issue, Some(parents.as_slice()), 10)
            .await
            .unwrap();
        assert_eq!(scoped, vec![inside.id.clone()]);

        let global = repo.unsynced_ids(EntityType::Issue, None, 10).await.unwrap();
        assert_eq!(global.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_ids_latest_wins() {
        let repo = MemoryRepository::new();
        let mut issue = Issue::new("r1", "a.rs", "one");
        issue.id = "i1".to_string();
        repo.insert(Entity::Issue(issue)).unwrap();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(1);

        // Insert the later success first so only sorting can get this right.
        repo.record_log(&NewSyncLog::success(SyncType::Manual, EntityType::Issue, "i1", t1, t1))
            .await
            .unwrap();
        repo.record_log(&NewSyncLog::failure(
            SyncType::Manual,
            EntityType::Issue,
            "i1",
            SyncErrorType::Network,
            "refused",
            t0,
            t0,
        ))
        .await
        .unwrap();

        assert!(repo.failed_ids(EntityType::Issue, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_ids_limit_and_deleted_records() {
        let repo = MemoryRepository::new();
        let at = Utc::now();
        let mut ids = Vec::new();
        for i in 0..3 {
            let issue = Issue::new("r1", "a.rs", format!("issue {}", i));
            repo.record_log(&NewSyncLog::failure(
                SyncType::Manual,
                EntityType::Issue,
                &issue.id,
                SyncErrorType::Server,
                "HTTP 500",
                at,
                at,
            ))
            .await
            .unwrap();
            ids.push(issue.id.clone());
            repo.insert(Entity::Issue(issue)).unwrap();
        }

        assert!(repo.failed_ids(EntityType::Issue, 0).await.unwrap().is_empty());
        assert_eq!(repo.failed_ids(EntityType::Issue, 2).await.unwrap().len(), 2);

        repo.remove(EntityType::Issue, &ids[1]).unwrap();
        let failed = repo.failed_ids(EntityType::Issue, 10).await.unwrap();
        assert_eq!(failed.len(), 2);
        assert!(!failed.contains(&ids[1]));
        assert!(repo.remove(EntityType::Issue, &ids[1]).is_err());
    }

    #[tokio::test]
    async fn test_mark_synced_and_fault_injection() {
        let repo = MemoryRepository::new();
        let workspace = Workspace::new("ws", "/ws");
        repo.insert(Entity::Workspace(workspace.clone())).unwrap();

        repo.set_fail_mark_synced(true);
        assert!(repo
            .mark_synced(EntityType::Workspace, &workspace.id, Utc::now())
            .await
            .is_err());

        repo.set_fail_mark_synced(false);
        repo.mark_synced(EntityType::Workspace, &workspace.id, Utc::now())
            .await
            .unwrap();
        let stored = repo.get(EntityType::Workspace, &workspace.id).unwrap().unwrap();
        assert!(!stored.needs_sync());

        repo.touch(EntityType::Workspace, &workspace.id).unwrap();
        let stored = repo.get(EntityType::Workspace, &workspace.id).unwrap().unwrap();
        assert!(stored.needs_sync());
    }
}
