//! Request/response transport: one HTTP POST per payload.
//!
//! A single pooled `reqwest::Client` is reused for every call. The bearer
//! token, when present, is fixed at construction; a new token means a new
//! transport (see [`TransportHandle::rebuild`](super::TransportHandle::rebuild)).

use std::time::Duration;

use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use super::TransportError;
use crate::payload::Payload;

/// Maximum idle connections kept per host.
const POOL_MAX_IDLE_PER_HOST: usize = 4;

/// How long an idle pooled connection is kept.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Outcome of one ingest call, before it is collapsed to a bool.
#[derive(Debug)]
pub enum IngestOutcome {
    /// 2xx response
    Accepted(StatusCode),
    /// Non-2xx response with its body
    Rejected { status: StatusCode, body: String },
    /// Network error or timeout
    Failed(reqwest::Error),
    /// The transport was closed
    Closed,
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestOutcome::Accepted(_))
    }
}

/// HTTP transport posting payloads to the ingest endpoint.
pub struct HttpTransport {
    /// The underlying HTTP client (reused for connection pooling);
    /// `None` once closed, which drops the pool and its idle connections
    client: Mutex<Option<Client>>,

    /// URL for the ingest endpoint
    ingest_url: String,

    /// Bearer token attached to every request, if registered
    token: Option<String>,

    /// Request timeout duration
    timeout: Duration,
}

impl HttpTransport {
    /// Create a new HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Http` if the HTTP client cannot be built.
    pub fn new(
        ingest_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()
            .map_err(TransportError::Http)?;

        Ok(Self {
            client: Mutex::new(Some(client)),
            ingest_url: ingest_url.into(),
            token,
            timeout,
        })
    }

    /// POST one payload and classify the response.
    pub async fn ingest(&self, payload: &Payload) -> IngestOutcome {
        // Cloning shares the pool; the lock is not held across the request
        let client = match self.client.lock().clone() {
            Some(client) => client,
            None => return IngestOutcome::Closed,
        };

        let mut request = client
            .post(&self.ingest_url)
            .timeout(self.timeout)
            .json(payload);

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return IngestOutcome::Failed(e),
        };

        let status = response.status();
        if status.is_success() {
            IngestOutcome::Accepted(status)
        } else {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            IngestOutcome::Rejected { status, body }
        }
    }

    /// Deliver one payload. `true` only for a 2xx response.
    pub async fn send(&self, payload: &Payload) -> bool {
        match self.ingest(payload).await {
            IngestOutcome::Accepted(status) => {
                debug!(status = %status, url = %self.ingest_url, "HTTP ingest accepted");
                true
            }
            IngestOutcome::Rejected { status, body } => {
                warn!(status = %status, body = %body, "HTTP ingest rejected");
                false
            }
            IngestOutcome::Failed(e) => {
                warn!(error = %e, timeout = e.is_timeout(), "HTTP ingest error");
                false
            }
            IngestOutcome::Closed => {
                debug!("HTTP transport closed, not sending");
                false
            }
        }
    }

    /// Release the session and its pooled connections. Later sends report
    /// failure.
    ///
    /// Must be called once; a second call is logged and ignored.
    pub fn close(&self) {
        let client = self.client.lock().take();
        match client {
            Some(client) => {
                drop(client);
                info!(url = %self.ingest_url, "HTTP transport closed");
            }
            None => warn!("HTTP transport already closed"),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.client.lock().is_none()
    }

    /// Get the configured ingest URL.
    pub fn ingest_url(&self) -> &str {
        &self.ingest_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Get the request timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
