//! Capability traits the sync subsystem uses to reach the local store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use reviewsync_common::{EntityType, Error, Result};

use crate::models::{Entity, NewSyncLog};
use crate::sqlite::Store;

/// Well-known keys in the settings table.
pub mod setting_keys {
    /// Base URL of the sync server.
    pub const SERVER_URL: &str = "server_url";
    /// Bearer token sent with every request.
    pub const API_TOKEN: &str = "api_token";
    /// Human-readable name of this machine.
    pub const DEVICE_NAME: &str = "device_name";
    /// `"false"` disables reconciliation; anything else (or unset) enables it.
    pub const SYNC_ENABLED: &str = "sync_enabled";
}

/// Interpret the stored `sync_enabled` value.
pub fn sync_enabled(value: Option<&str>) -> bool {
    !matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("false") | Some("0") | Some("off") | Some("no")
    )
}

/// Store operations needed to reconcile local records with the server.
///
/// Implementations must be safe to call from concurrent tasks. Lock
/// contention is reported as `Error::Busy` so callers can retry.
#[async_trait]
pub trait SyncRepository: Send + Sync {
    /// IDs needing sync, newest `updated_at` first, capped at `limit`.
    ///
    /// `parents` restricts the result to children of the given parent IDs;
    /// `None` means no scope and also returns parentless records.
    async fn unsynced_ids(
        &self,
        entity_type: EntityType,
        parents: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<String>>;

    /// IDs whose most recent sync log row is a failure.
    async fn failed_ids(&self, entity_type: EntityType, limit: usize) -> Result<Vec<String>>;

    /// Look up a record by type and ID.
    async fn load_entity(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>>;

    /// Append a push attempt to the audit log.
    async fn record_log(&self, log: &NewSyncLog) -> Result<i64>;

    /// Advance the record's `synced_at`.
    async fn mark_synced(&self, entity_type: EntityType, id: &str, at: DateTime<Utc>)
        -> Result<()>;
}

/// Key/value settings shared with the rest of the application.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}

/// Run a store call on the blocking pool.
///
/// A call can hold the connection for up to the busy timeout, which must not
/// stall the async workers.
async fn blocking<T, F>(store: &Store, f: F) -> Result<T>
where
    F: FnOnce(&Store) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| Error::Database(format!("Store task failed: {}", e)))?
}

#[async_trait]
impl SyncRepository for Store {
    async fn unsynced_ids(
        &self,
        entity_type: EntityType,
        parents: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let parents = parents.map(<[String]>::to_vec);
        blocking(self, move |store| {
            store.unsynced_ids(entity_type, parents.as_deref(), limit)
        })
        .await
    }

    async fn failed_ids(&self, entity_type: EntityType, limit: usize) -> Result<Vec<String>> {
        blocking(self, move |store| store.failed_ids(entity_type, limit)).await
    }

    async fn load_entity(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>> {
        let id = id.to_string();
        blocking(self, move |store| store.load_entity(entity_type, &id)).await
    }

    async fn record_log(&self, log: &NewSyncLog) -> Result<i64> {
        let log = log.clone();
        blocking(self, move |store| store.record_log(&log)).await
    }

    async fn mark_synced(
        &self,
        entity_type: EntityType,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let id = id.to_string();
        blocking(self, move |store| store.mark_synced(entity_type, &id, at)).await
    }
}

#[async_trait]
impl SettingsStore for Store {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        blocking(self, move |store| store.get_setting(&key)).await
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        blocking(self, move |store| store.set_setting(&key, &value)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_enabled_values() {
        assert!(sync_enabled(None));
        assert!(sync_enabled(Some("true")));
        assert!(sync_enabled(Some("")));
        assert!(!sync_enabled(Some("false")));
        assert!(!sync_enabled(Some(" FALSE ")));
        assert!(!sync_enabled(Some("0")));
    }

    #[tokio::test]
    async fn test_store_through_trait_objects() {
        let store = std::sync::Arc::new(Store::in_memory().unwrap());
        let settings: std::sync::Arc<dyn SettingsStore> = store.clone();
        settings
            .set_setting(setting_keys::DEVICE_NAME, "laptop")
            .await
            .unwrap();

        let repo: std::sync::Arc<dyn SyncRepository> = store;
        assert!(repo
            .unsynced_ids(EntityType::Issue, None, 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            settings
                .get_setting(setting_keys::DEVICE_NAME)
                .await
                .unwrap()
                .as_deref(),
            Some("laptop")
        );
    }

    #[tokio::test]
    async fn test_busy_wait_runs_off_the_async_worker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reviewsync.db");
        let holder = Store::open(&path).unwrap();
        let contender =
            Store::open_with_timeout(&path, std::time::Duration::from_secs(2)).unwrap();
        holder.conn().unwrap().execute_batch("BEGIN IMMEDIATE;").unwrap();

        let settings: std::sync::Arc<dyn SettingsStore> = std::sync::Arc::new(contender);
        let write = tokio::spawn(async move {
            settings.set_setting(setting_keys::DEVICE_NAME, "laptop").await
        });

        // Only reachable while the write waits on the lock if it is not
        // holding this (single) runtime thread.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        holder.conn().unwrap().execute_batch("COMMIT;").unwrap();

        write.await.unwrap().unwrap();
        assert_eq!(
            holder
                .get_setting(setting_keys::DEVICE_NAME)
                .unwrap()
                .as_deref(),
            Some("laptop")
        );
    }
}
