//! HTTP transport to the sync server.

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use reviewsync_store::{Entity, SettingsStore};

use crate::auth::Credentials;
use crate::dto::{ErrorBody, SyncPayload, SyncResponse};
use crate::error::RemoteError;

/// Path of the token check endpoint, relative to the server base URL.
const VERIFY_PATH: &str = "api/auth/verify";

/// Header carrying the configured device name.
const DEVICE_HEADER: &str = "X-Device-Name";

/// Configuration for the HTTP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Server URL; overrides the `server_url` setting when set.
    pub base_url: Option<String>,
    /// Total time allowed for one request.
    pub request_timeout: Duration,
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Idle connections kept per host.
    pub pool_max_idle_per_host: usize,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pool_max_idle_per_host: 4,
            user_agent: format!("ReviewSync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Outbound side of reconciliation.
///
/// One call pushes one record. Implementations classify every failure so
/// the caller can log it without inspecting transport details.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Push a record to its typed endpoint.
    async fn push(&self, entity: &Entity) -> Result<SyncResponse, RemoteError>;

    /// Ask the server whether the configured token is accepted.
    ///
    /// Returns `Ok(false)` for a rejected token and `Err` when the answer
    /// is unknown.
    async fn verify_token(&self) -> Result<bool, RemoteError>;
}

/// `SyncTransport` over HTTPS with bearer authentication.
pub struct HttpTransport {
    http: Client,
    credentials: Credentials,
}

impl HttpTransport {
    /// Create a transport reading credentials from `settings`.
    ///
    /// # Errors
    /// - `RemoteError::Config` if `base_url` is malformed or the HTTP
    ///   client cannot be built
    pub fn new(config: RemoteConfig, settings: Arc<dyn SettingsStore>) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| RemoteError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let mut credentials = Credentials::new(settings);
        if let Some(raw) = config.base_url.as_deref() {
            let url = Url::parse(raw)
                .map_err(|e| RemoteError::Config(format!("Invalid server URL: {}", e)))?;
            credentials = credentials.with_base_url(url);
        }

        Ok(Self { http, credentials })
    }

    async fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.credentials
            .base_url()
            .await?
            .join(path)
            .map_err(|e| RemoteError::Config(format!("Invalid endpoint {}: {}", path, e)))
    }

    /// Get authorization header.
    async fn auth_header(&self) -> Result<String, RemoteError> {
        let token = self.credentials.token().await?;
        Ok(format!("Bearer {}", token))
    }

    /// Turn a non-success response into a classified error.
    async fn error_from_response(&self, response: Response) -> RemoteError {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.credentials.invalidate().await;
        }

        let body = response.text().await.unwrap_or_default();
        let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
        let message = parsed
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                format!(
                    "HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                )
            });

        RemoteError::Http {
            status: status.as_u16(),
            code: parsed.error_code,
            message,
        }
    }

    async fn handle_push_response(&self, response: Response) -> Result<SyncResponse, RemoteError> {
        let status = response.status();
        if !status.is_success() {
            return Err(self.error_from_response(response).await);
        }

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(SyncResponse {
                success: true,
                ..SyncResponse::default()
            });
        }

        let decoded: SyncResponse =
            serde_json::from_slice(&body).map_err(|e| RemoteError::Decode {
                status: status.as_u16(),
                message: e.to_string(),
            })?;
        if !decoded.success {
            let reason = decoded
                .error_message
                .or(decoded.message)
                .unwrap_or_else(|| "success=false".to_string());
            return Err(RemoteError::Rejected(reason));
        }
        Ok(decoded)
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn push(&self, entity: &Entity) -> Result<SyncResponse, RemoteError> {
        let entity_type = entity.entity_type();
        let body = SyncPayload::from_entity(entity)?.to_body(entity_type)?;
        let url = self
            .endpoint(&format!("api/sync/{}", entity_type.endpoint()))
            .await?;
        let auth = self.auth_header().await?;

        let mut request = self
            .http
            .post(url)
            .header(header::AUTHORIZATION, auth)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(device) = self.credentials.device_name().await {
            request = request.header(DEVICE_HEADER, device);
        }

        tracing::trace!(entity_type = %entity_type, id = entity.id(), "Pushing record");
        let response = request.send().await?;
        self.handle_push_response(response).await
    }

    async fn verify_token(&self) -> Result<bool, RemoteError> {
        let url = self.endpoint(VERIFY_PATH).await?;
        let auth = match self.auth_header().await {
            Ok(auth) => auth,
            Err(RemoteError::Unauthenticated(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let response = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, auth)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status == StatusCode::UNAUTHORIZED {
            self.credentials.invalidate().await;
            Ok(false)
        } else {
            Err(self.error_from_response(response).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewsync_store::MemoryRepository;

    #[test]
    fn test_default_config() {
        let config = RemoteConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.user_agent.starts_with("ReviewSync/"));
        assert!(config.base_url.is_none());
    }

    #[test]
    fn test_rejects_malformed_base_url() {
        let config = RemoteConfig {
            base_url: Some("::nope".to_string()),
            ..RemoteConfig::default()
        };
        let result = HttpTransport::new(config, Arc::new(MemoryRepository::new()));
        assert!(matches!(result, Err(RemoteError::Config(_))));
    }
}
