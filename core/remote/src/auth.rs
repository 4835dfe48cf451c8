//! Bearer token and server address resolution.

use std::sync::Arc;

use url::Url;

use reviewsync_store::{setting_keys, SettingsStore};

use crate::error::RemoteError;

/// Resolves connection details from the settings store.
///
/// The bearer token is cached after the first read and dropped again when
/// the server rejects it, so a rotated token is picked up without a restart.
/// The server URL is read on every call unless an override was configured.
pub struct Credentials {
    settings: Arc<dyn SettingsStore>,
    base_url: Option<Url>,
    token: tokio::sync::RwLock<Option<String>>,
}

impl Credentials {
    /// Create credentials backed by `settings`.
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            settings,
            base_url: None,
            token: tokio::sync::RwLock::new(None),
        }
    }

    /// Use a fixed server URL instead of the `server_url` setting.
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    async fn setting(&self, key: &str) -> Result<Option<String>, RemoteError> {
        let value = self
            .settings
            .get_setting(key)
            .await
            .map_err(|e| RemoteError::Config(format!("Failed to read {}: {}", key, e)))?;
        Ok(value.filter(|v| !v.trim().is_empty()))
    }

    /// Get the bearer token, reading settings if nothing is cached.
    ///
    /// # Errors
    /// - `RemoteError::Unauthenticated` if no token is configured
    pub async fn token(&self) -> Result<String, RemoteError> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let mut cached = self.token.write().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let token = self
            .setting(setting_keys::API_TOKEN)
            .await?
            .ok_or_else(|| RemoteError::Unauthenticated("no API token configured".to_string()))?;
        tracing::debug!("Loaded API token from settings");
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Forget the cached token.
    pub async fn invalidate(&self) {
        if self.token.write().await.take().is_some() {
            tracing::info!("Discarded rejected API token");
        }
    }

    /// Resolve the server base URL.
    ///
    /// The returned URL always ends in `/` so relative endpoint paths join
    /// beneath it.
    pub async fn base_url(&self) -> Result<Url, RemoteError> {
        let mut url = match &self.base_url {
            Some(url) => url.clone(),
            None => {
                let raw = self
                    .setting(setting_keys::SERVER_URL)
                    .await?
                    .ok_or_else(|| RemoteError::Config("no server URL configured".to_string()))?;
                Url::parse(raw.trim())
                    .map_err(|e| RemoteError::Config(format!("Invalid server URL: {}", e)))?
            }
        };

        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Device name sent alongside pushes, if configured.
    pub async fn device_name(&self) -> Option<String> {
        self.setting(setting_keys::DEVICE_NAME).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewsync_store::MemoryRepository;

    fn settings() -> Arc<MemoryRepository> {
        Arc::new(MemoryRepository::new())
    }

    #[tokio::test]
    async fn test_token_cached_until_invalidated() {
        let store = settings();
        store.set_setting(setting_keys::API_TOKEN, "first").await.unwrap();
        let credentials = Credentials::new(store.clone());

        assert_eq!(credentials.token().await.unwrap(), "first");
        store.set_setting(setting_keys::API_TOKEN, "second").await.unwrap();
        assert_eq!(credentials.token().await.unwrap(), "first");

        credentials.invalidate().await;
        assert_eq!(credentials.token().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthenticated() {
        let store = settings();
        store.set_setting(setting_keys::API_TOKEN, "  ").await.unwrap();
        let credentials = Credentials::new(store);
        assert!(matches!(
            credentials.token().await,
            Err(RemoteError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn test_base_url_gets_trailing_slash() {
        let store = settings();
        store
            .set_setting(setting_keys::SERVER_URL, "https://sync.example.com/v1")
            .await
            .unwrap();
        let credentials = Credentials::new(store);

        let base = credentials.base_url().await.unwrap();
        assert_eq!(
            base.join("api/sync/issue").unwrap().as_str(),
            "https://sync.example.com/v1/api/sync/issue"
        );
    }

    #[tokio::test]
    async fn test_missing_or_bad_server_url_is_config_error() {
        let store = settings();
        let credentials = Credentials::new(store.clone());
        assert!(matches!(
            credentials.base_url().await,
            Err(RemoteError::Config(_))
        ));

        store
            .set_setting(setting_keys::SERVER_URL, "not a url")
            .await
            .unwrap();
        assert!(matches!(
            credentials.base_url().await,
            Err(RemoteError::Config(_))
        ));
    }
}
