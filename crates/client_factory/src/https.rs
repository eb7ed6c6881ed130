//! HTTPS sender
//!
//! Posts each record as a JSON envelope to the primary endpoint, using a
//! client certificate for mutual TLS.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use contracts::{BackendClient, BackendKind, ConnectionState, DeliveryResult, HttpsSettings, Record};
use reqwest::{Client, Identity};
use tracing::{debug, instrument, warn};

use crate::error::{FactoryError, Result};
use crate::http::{classify_status, classify_transport_error, envelope};

/// Read certificate and key into one PEM identity
///
/// # Errors
/// - Either file unreadable
/// - No usable certificate/private key in the PEM data
pub fn load_identity(cert_path: &Path, key_path: &Path) -> Result<Identity> {
    let mut pem = std::fs::read(cert_path)
        .map_err(|e| FactoryError::tls_config(cert_path.display().to_string(), e.to_string()))?;
    let key = std::fs::read(key_path)
        .map_err(|e| FactoryError::tls_config(key_path.display().to_string(), e.to_string()))?;

    pem.push(b'\n');
    pem.extend_from_slice(&key);

    Identity::from_pem(&pem)
        .map_err(|e| FactoryError::tls_config(cert_path.display().to_string(), e.to_string()))
}

/// HTTPS log-ingestion client
pub struct HttpsSender {
    client: Option<Client>,
    endpoint: String,
    timeout: Duration,
    state: ConnectionState,
    last_error: Option<String>,
}

impl HttpsSender {
    /// Build the sender
    ///
    /// No request is made here; the identity is loaded eagerly so a bad
    /// certificate surfaces before the first record.
    #[instrument(name = "https_sender_build", skip(settings), fields(endpoint = %settings.endpoint))]
    pub fn build(settings: &HttpsSettings) -> Result<Self> {
        let identity = load_identity(
            Path::new(&settings.cert_file_path),
            Path::new(&settings.key_file_path),
        )?;

        let client = Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .timeout(settings.timeout())
            .build()
            .map_err(|e| FactoryError::http_client(BackendKind::Https, e.to_string()))?;

        debug!("https sender ready");
        Ok(Self {
            client: Some(client),
            endpoint: settings.endpoint.clone(),
            timeout: settings.timeout(),
            state: ConnectionState::Connected,
            last_error: None,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn record_outcome(&mut self, result: &DeliveryResult) {
        match result.reason() {
            None => {
                self.state = ConnectionState::Connected;
                self.last_error = None;
            }
            Some(reason) => {
                self.state = ConnectionState::Failed;
                self.last_error = Some(reason.to_string());
            }
        }
    }
}

#[async_trait]
impl BackendClient for HttpsSender {
    fn kind(&self) -> BackendKind {
        BackendKind::Https
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[instrument(name = "https_sender_send", skip(self, record), fields(record_id = record.id()))]
    async fn send(&mut self, record: &Record) -> DeliveryResult {
        let Some(client) = self.client.as_ref() else {
            return DeliveryResult::retriable("https sender closed");
        };

        let result = match client
            .post(&self.endpoint)
            .json(&envelope(record))
            .send()
            .await
        {
            Ok(response) => classify_status(response.status()),
            Err(e) => classify_transport_error(&e),
        };

        if let Some(reason) = result.reason() {
            warn!(outcome = result.outcome(), reason, "https delivery failed");
        }
        self.record_outcome(&result);
        result
    }

    async fn close(&mut self) {
        if self.client.take().is_some() {
            debug!(endpoint = %self.endpoint, "https sender closed");
        }
        self.state = ConnectionState::Disconnected;
    }
}
