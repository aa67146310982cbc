//! Transport module: how a payload leaves the device.
//!
//! [`Transport`] is a closed set of delivery mechanisms selected once from
//! [`TransportKind`]. Every variant answers `send` with a plain `bool` and
//! never raises past its boundary. [`TransportHandle`] owns the current
//! transport and swaps it atomically when the bearer token changes.

pub mod http;
pub mod mqtt;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use crate::config::{Config, MqttConfig, TransportKind};
use crate::payload::Payload;

pub use http::{HttpTransport, IngestOutcome};
pub use mqtt::{ConnectionState, MqttTransport};

/// Errors raised while constructing a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to read TLS file {path}: {source}")]
    Tls {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("MQTT setup failed: {0}")]
    Mqtt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything a payload can be delivered through.
///
/// `true` means the payload was accepted; `false` covers every failure.
#[async_trait]
pub trait PayloadSink: Send + Sync {
    async fn send(&self, payload: &Payload) -> bool;
}

/// Everything needed to (re)build a transport except the token.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub kind: TransportKind,
    pub ingest_url: String,
    pub request_timeout: Duration,
    pub device_id: String,
    pub mqtt: MqttConfig,
}

impl TransportSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            kind: config.mode,
            ingest_url: config.ingest_url(),
            request_timeout: config.request_timeout,
            device_id: config.device_id.clone(),
            mqtt: config.mqtt.clone(),
        }
    }
}

/// The delivery mechanism in use.
pub enum Transport {
    /// One HTTP POST per payload
    RequestResponse(HttpTransport),
    /// Publish over a long-lived broker connection
    PersistentPublish(MqttTransport),
}

impl Transport {
    /// Build the transport for `settings.kind`, authenticated with `token`.
    pub async fn connect(
        settings: &TransportSettings,
        token: Option<&str>,
    ) -> Result<Self, TransportError> {
        match settings.kind {
            TransportKind::Http => Ok(Transport::RequestResponse(HttpTransport::new(
                settings.ingest_url.clone(),
                token.map(str::to_string),
                settings.request_timeout,
            )?)),
            TransportKind::Mqtt => Ok(Transport::PersistentPublish(
                MqttTransport::connect(&settings.mqtt, &settings.device_id, token).await?,
            )),
        }
    }

    pub async fn send(&self, payload: &Payload) -> bool {
        match self {
            Transport::RequestResponse(http) => http.send(payload).await,
            Transport::PersistentPublish(mqtt) => mqtt.send(payload).await,
        }
    }

    /// Release the underlying session or broker connection.
    pub async fn close(&self) {
        match self {
            Transport::RequestResponse(http) => http.close(),
            Transport::PersistentPublish(mqtt) => mqtt.close().await,
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::RequestResponse(_) => TransportKind::Http,
            Transport::PersistentPublish(_) => TransportKind::Mqtt,
        }
    }
}

#[async_trait]
impl PayloadSink for Transport {
    async fn send(&self, payload: &Payload) -> bool {
        Transport::send(self, payload).await
    }
}

/// Owner of the active transport.
///
/// Readers call [`current`](TransportHandle::current) for every send and
/// keep the returned `Arc` for that send only. A rebuild installs the new
/// transport before closing the old one, so a send observes either the old
/// token or the new one, never a mix. A rebuild returns only after every
/// send that picked up the old transport has finished.
pub struct TransportHandle {
    settings: TransportSettings,
    current: RwLock<Arc<Transport>>,
    rebuild_lock: tokio::sync::Mutex<()>,
    /// Held shared by each send, exclusively to drain sends before a close
    in_flight: tokio::sync::RwLock<()>,
}

impl TransportHandle {
    /// Build the initial transport.
    pub async fn connect(
        settings: TransportSettings,
        token: Option<&str>,
    ) -> Result<Self, TransportError> {
        let transport = Transport::connect(&settings, token).await?;
        info!(
            kind = %settings.kind,
            authenticated = token.is_some(),
            "Transport ready"
        );

        Ok(Self {
            settings,
            current: RwLock::new(Arc::new(transport)),
            rebuild_lock: tokio::sync::Mutex::new(()),
            in_flight: tokio::sync::RwLock::new(()),
        })
    }

    /// The transport to use for the next send.
    pub fn current(&self) -> Arc<Transport> {
        self.current.read().clone()
    }

    /// Replace the transport with one using `token`.
    ///
    /// Rebuilds are serialized. On error the previous transport stays in
    /// place.
    pub async fn rebuild(&self, token: Option<&str>) -> Result<(), TransportError> {
        let _guard = self.rebuild_lock.lock().await;

        let fresh = Arc::new(Transport::connect(&self.settings, token).await?);
        let previous = std::mem::replace(&mut *self.current.write(), fresh);

        info!(kind = %self.settings.kind, "Transport rebuilt with new token");
        drop(self.in_flight.write().await);
        previous.close().await;
        Ok(())
    }

    /// Close the active transport. Later sends report failure.
    pub async fn close(&self) {
        let _guard = self.rebuild_lock.lock().await;
        drop(self.in_flight.write().await);
        self.current().close().await;
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }
}

#[async_trait]
impl PayloadSink for TransportHandle {
    async fn send(&self, payload: &Payload) -> bool {
        let _sending = self.in_flight.read().await;
        self.current().send(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_settings() -> TransportSettings {
        TransportSettings {
            kind: TransportKind::Http,
            ingest_url: "http://127.0.0.1:9/ingest".to_string(),
            request_timeout: Duration::from_secs(1),
            device_id: "DEV-001".to_string(),
            mqtt: MqttConfig::default(),
        }
    }

    fn token_of(transport: &Transport) -> Option<String> {
        match transport {
            Transport::RequestResponse(http) => http.token().map(str::to_string),
            Transport::PersistentPublish(_) => None,
        }
    }

    #[test]
    fn test_settings_from_config() {
        let config = Config::default();
        let settings = TransportSettings::from_config(&config);
        assert_eq!(settings.kind, TransportKind::Http);
        assert_eq!(settings.ingest_url, "http://localhost:8000/ingest");
        assert_eq!(settings.device_id, "DEV-001");
    }

    #[tokio::test]
    async fn test_handle_selects_kind() {
        let handle = TransportHandle::connect(http_settings(), None).await.unwrap();
        assert_eq!(handle.current().kind(), TransportKind::Http);
        assert_eq!(token_of(&handle.current()), None);
    }

    #[tokio::test]
    async fn test_rebuild_swaps_and_closes_previous() {
        let handle = TransportHandle::connect(http_settings(), Some("old"))
            .await
            .unwrap();
        let before = handle.current();

        handle.rebuild(Some("new")).await.unwrap();
        let after = handle.current();

        assert_eq!(token_of(&after), Some("new".to_string()));
        assert!(!Arc::ptr_eq(&before, &after));
        match before.as_ref() {
            Transport::RequestResponse(http) => assert!(http.is_closed()),
            Transport::PersistentPublish(_) => panic!("expected HTTP transport"),
        }
    }

    #[tokio::test]
    async fn test_close_makes_sends_fail() {
        let handle = TransportHandle::connect(http_settings(), None).await.unwrap();
        handle.close().await;

        match handle.current().as_ref() {
            Transport::RequestResponse(http) => assert!(http.is_closed()),
            Transport::PersistentPublish(_) => panic!("expected HTTP transport"),
        }
    }

    #[tokio::test]
    async fn test_rebuild_waits_for_sends_in_flight() {
        let handle = Arc::new(
            TransportHandle::connect(http_settings(), Some("old"))
                .await
                .unwrap(),
        );
        let sending = handle.in_flight.read().await;

        let rebuilding = tokio::spawn({
            let handle = Arc::clone(&handle);
            async move { handle.rebuild(Some("new")).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!rebuilding.is_finished());
        // New sends already see the fresh token
        assert_eq!(token_of(&handle.current()), Some("new".to_string()));

        drop(sending);
        rebuilding.await.unwrap().unwrap();
    }
}
