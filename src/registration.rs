//! Device registration and the bearer token lifecycle.
//!
//! A device starts unregistered (no token) and sends unauthenticated. A
//! successful registration persists the returned token and rebuilds the
//! transport so every later send carries it. Registration can be repeated
//! at any time; the newest token wins.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::payload::DeviceIdentity;
use crate::transport::{TransportError, TransportHandle};

/// On-disk token file contents.
#[derive(Debug, Serialize, Deserialize)]
struct TokenFile {
    token: String,
}

/// Errors from reading or writing the token file.
#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("token file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("token encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Persistent storage for the bearer token.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the stored token. A missing or unreadable file means no token.
    pub async fn load(&self) -> Option<String> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored token");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read token file");
                return None;
            }
        };

        match serde_json::from_str::<TokenFile>(&raw) {
            Ok(file) if !file.token.is_empty() => Some(file.token),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Malformed token file, ignoring");
                None
            }
        }
    }

    /// Replace the stored token.
    ///
    /// Writes a temp file next to the target and renames it over, so the
    /// file always holds one complete token.
    pub async fn save(&self, token: &str) -> Result<(), TokenStoreError> {
        let body = serde_json::to_vec(&TokenFile {
            token: token.to_string(),
        })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| self.io_error(source))?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|source| self.io_error(source))?;
        file.write_all(&body)
            .await
            .map_err(|source| self.io_error(source))?;
        file.sync_all()
            .await
            .map_err(|source| self.io_error(source))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| self.io_error(source))?;

        debug!(path = %self.path.display(), "Token persisted");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> TokenStoreError {
        TokenStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Body of a registration request.
#[derive(Debug, Serialize)]
struct RegistrationRequest<'a> {
    market_id: &'a str,
    device_id: &'a str,
    role: &'a str,
}

/// Response from the registration endpoint.
///
/// Fields other than `token` (for example a QR code data URL) are kept
/// verbatim in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResponse {
    #[serde(default)]
    pub token: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Errors from a registration attempt.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("registration request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("registration rejected with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("registration response did not contain a token")]
    MissingToken,

    #[error("failed to persist token: {0}")]
    Persist(#[from] TokenStoreError),

    #[error("token saved but transport rebuild failed: {0}")]
    Rebuild(#[from] TransportError),
}

/// Performs registrations against the platform.
pub struct Registrar {
    client: Client,
    register_url: String,
    store: TokenStore,

    /// Serializes registrations so persist and rebuild happen in one order
    in_flight: tokio::sync::Mutex<()>,
}

impl Registrar {
    pub fn new(
        register_url: impl Into<String>,
        timeout: Duration,
        store: TokenStore,
    ) -> Result<Self, RegistrationError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            register_url: register_url.into(),
            store,
            in_flight: tokio::sync::Mutex::new(()),
        })
    }

    /// POST the identity and parse the response. Touches nothing local.
    pub async fn request(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<RegistrationResponse, RegistrationError> {
        let body = RegistrationRequest {
            market_id: &identity.market_id,
            device_id: &identity.device_id,
            role: &identity.role,
        };

        let response = self
            .client
            .post(&self.register_url)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RegistrationError::Status { status, body });
        }

        Ok(response.json().await?)
    }

    /// Register, persist the token and switch `transport` over to it.
    ///
    /// Nothing is persisted unless the platform answered 2xx with a token.
    pub async fn register(
        &self,
        identity: &DeviceIdentity,
        transport: &TransportHandle,
    ) -> Result<RegistrationResponse, RegistrationError> {
        let _guard = self.in_flight.lock().await;
        info!(
            url = %self.register_url,
            device_id = %identity.device_id,
            market_id = %identity.market_id,
            "Registering device"
        );

        let response = self.request(identity).await.map_err(|e| {
            error!(error = %e, "Device registration failed");
            e
        })?;

        let token = match response.token.as_deref() {
            Some(token) if !token.is_empty() => token,
            _ => {
                error!("Registration response carried no token");
                return Err(RegistrationError::MissingToken);
            }
        };

        self.store.save(token).await?;
        transport.rebuild(Some(token)).await?;

        info!(device_id = %identity.device_id, "Device registered, transport now authenticated");
        Ok(response)
    }

    pub fn register_url(&self) -> &str {
        &self.register_url
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MqttConfig, TransportKind};
    use crate::transport::TransportSettings;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_token_store_roundtrip_and_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("state").join("token.json"));

        assert_eq!(store.load().await, None);

        store.save("first").await.unwrap();
        store.save("second").await.unwrap();
        assert_eq!(store.load().await.as_deref(), Some("second"));

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, r#"{"token":"second"}"#);
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_token_store_ignores_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "not json").unwrap();

        assert_eq!(TokenStore::new(&path).load().await, None);
    }

    #[test]
    fn test_response_keeps_extra_fields() {
        let response: RegistrationResponse =
            serde_json::from_str(r#"{"token":"abc","qr":"data:image/png;base64,xyz"}"#).unwrap();
        assert_eq!(response.token.as_deref(), Some("abc"));
        assert_eq!(response.extra["qr"], "data:image/png;base64,xyz");

        let without: RegistrationResponse = serde_json::from_str(r#"{"detail":"ok"}"#).unwrap();
        assert!(without.token.is_none());
    }

    #[test]
    fn test_request_body_shape() {
        let identity = DeviceIdentity::new("DEV-001", "PASAR-001");
        let body = RegistrationRequest {
            market_id: &identity.market_id,
            device_id: &identity.device_id,
            role: &identity.role,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"market_id": "PASAR-001", "device_id": "DEV-001", "role": "operator"})
        );
    }

    #[tokio::test]
    async fn test_unreachable_platform_persists_nothing() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        let registrar = Registrar::new(
            "http://127.0.0.1:9/register",
            Duration::from_secs(2),
            store.clone(),
        )
        .unwrap();
        let transport = TransportHandle::connect(
            TransportSettings {
                kind: TransportKind::Http,
                ingest_url: "http://127.0.0.1:9/ingest".to_string(),
                request_timeout: Duration::from_secs(1),
                device_id: "DEV-001".to_string(),
                mqtt: MqttConfig::default(),
            },
            None,
        )
        .await
        .unwrap();

        let result = registrar
            .register(&DeviceIdentity::new("DEV-001", "PASAR-001"), &transport)
            .await;

        assert!(matches!(result, Err(RegistrationError::Request(_))));
        assert!(!store.path().exists());
    }
}
