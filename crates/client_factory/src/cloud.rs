//! Cloud ingestion sender
//!
//! Streams records into a data-explorer table. Authentication uses the
//! OAuth2 client-credentials grant; the bearer token is cached and renewed
//! shortly before it expires.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use contracts::{
    BackendClient, BackendKind, CloudIngestSettings, ConnectionState, DeliveryResult, Record,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{FactoryError, Result};
use crate::http::{classify_status, classify_transport_error, envelope};

/// Renew the token this long before it expires
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    refresh_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.refresh_at
    }
}

/// Token endpoint for a tenant
pub fn token_url(settings: &CloudIngestSettings) -> String {
    format!(
        "{}/{}/oauth2/v2.0/token",
        settings.authority.trim_end_matches('/'),
        settings.tenant_id
    )
}

/// Streaming-ingest endpoint for the configured table
pub fn ingest_url(settings: &CloudIngestSettings) -> String {
    format!(
        "{}/v1/rest/ingest/{}/{}",
        settings.endpoint.trim_end_matches('/'),
        settings.database,
        settings.table
    )
}

/// Cloud data-explorer ingestion client
pub struct CloudIngestSender {
    http: Option<Client>,
    settings: CloudIngestSettings,
    token: Option<AccessToken>,
    state: ConnectionState,
    last_error: Option<String>,
}

impl CloudIngestSender {
    /// Build the HTTP client without authenticating
    pub fn new(settings: &CloudIngestSettings) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| FactoryError::http_client(BackendKind::CloudIngest, e.to_string()))?;

        Ok(Self {
            http: Some(http),
            settings: settings.clone(),
            token: None,
            state: ConnectionState::Disconnected,
            last_error: None,
        })
    }

    /// Build the client and acquire the first token
    ///
    /// Authentication failure leaves the sender in the `Failed` state.
    #[instrument(
        name = "cloud_sender_connect",
        skip(settings),
        fields(database = %settings.database, table = %settings.table)
    )]
    pub async fn connect(settings: &CloudIngestSettings) -> Result<Self> {
        let mut sender = Self::new(settings)?;
        match sender.refresh_token().await {
            Ok(()) => {
                info!("cloud ingestion authenticated");
                sender.state = ConnectionState::Connected;
            }
            Err(failure) => {
                warn!(reason = failure.reason().unwrap_or_default(), "cloud ingestion authentication failed");
                sender.state = ConnectionState::Failed;
                sender.last_error = failure.reason().map(str::to_string);
            }
        }
        Ok(sender)
    }

    /// Fetch a new bearer token
    async fn refresh_token(&mut self) -> std::result::Result<(), DeliveryResult> {
        let Some(http) = self.http.as_ref() else {
            return Err(DeliveryResult::retriable("cloud sender closed"));
        };

        let scope = format!("{}/.default", self.settings.endpoint.trim_end_matches('/'));
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];

        let response = http
            .post(token_url(&self.settings))
            .form(&form)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            // The identity provider answers bad credentials with 400/401
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    DeliveryResult::fatal(format!("token request rejected: {status}"))
                }
                _ => classify_status(status),
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| DeliveryResult::retriable(format!("invalid token response: {e}")))?;

        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        self.token = Some(AccessToken {
            value: body.access_token,
            refresh_at: Instant::now() + lifetime,
        });
        debug!(expires_in = body.expires_in, "cloud token refreshed");
        Ok(())
    }

    async fn bearer(&mut self) -> std::result::Result<String, DeliveryResult> {
        match &self.token {
            Some(token) if token.is_fresh() => Ok(token.value.clone()),
            _ => {
                self.refresh_token().await?;
                self.token
                    .as_ref()
                    .map(|t| t.value.clone())
                    .ok_or_else(|| DeliveryResult::retriable("no token after refresh"))
            }
        }
    }

    async fn post_record(&mut self, record: &Record) -> DeliveryResult {
        let token = match self.bearer().await {
            Ok(token) => token,
            Err(failure) => return failure,
        };
        let Some(http) = self.http.as_ref() else {
            return DeliveryResult::retriable("cloud sender closed");
        };

        let mut request = http
            .post(ingest_url(&self.settings))
            .query(&[("streamFormat", "multijson")])
            .bearer_auth(token)
            .json(&envelope(record));
        if let Some(mapping) = &self.settings.mapping {
            request = request.query(&[("mappingName", mapping.as_str())]);
        }

        match request.send().await {
            Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                // Token revoked or expired early; a fresh one is fetched on reconnect
                self.token = None;
                DeliveryResult::retriable("ingest rejected bearer token")
            }
            Ok(response) => classify_status(response.status()),
            Err(e) => classify_transport_error(&e),
        }
    }
}

#[async_trait]
impl BackendClient for CloudIngestSender {
    fn kind(&self) -> BackendKind {
        BackendKind::CloudIngest
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[instrument(name = "cloud_sender_send", skip(self, record), fields(record_id = record.id()))]
    async fn send(&mut self, record: &Record) -> DeliveryResult {
        let result = self.post_record(record).await;
        match result.reason() {
            None => {
                self.state = ConnectionState::Connected;
                self.last_error = None;
            }
            Some(reason) => {
                warn!(outcome = result.outcome(), reason, "cloud delivery failed");
                self.state = ConnectionState::Failed;
                self.last_error = Some(reason.to_string());
            }
        }
        result
    }

    async fn close(&mut self) {
        if self.http.take().is_some() {
            debug!(table = %self.settings.table, "cloud sender closed");
        }
        self.token = None;
        self.state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::{BackendSet, RecordPayload, DEFAULT_CLOUD_AUTHORITY};
    use mockito::{Matcher, Server};

    fn settings(base: &str) -> CloudIngestSettings {
        CloudIngestSettings {
            endpoint: base.to_string(),
            database: "logs".into(),
            table: "container".into(),
            tenant_id: "tenant-1".into(),
            client_id: "client-1".into(),
            client_secret: "secret-1".into(),
            authority: base.to_string(),
            mapping: None,
            timeout_secs: 5,
        }
    }

    fn record() -> Record {
        Record::new(
            9,
            RecordPayload::Text(Bytes::from_static(b"cloud line")),
            BackendSet::all(),
        )
    }

    #[test]
    fn test_urls() {
        let mut s = settings("https://c.example.net/");
        s.authority = format!("{DEFAULT_CLOUD_AUTHORITY}/");
        assert_eq!(
            token_url(&s),
            "https://login.microsoftonline.com/tenant-1/oauth2/v2.0/token"
        );
        assert_eq!(
            ingest_url(&s),
            "https://c.example.net/v1/rest/ingest/logs/container"
        );
    }

    #[tokio::test]
    async fn test_connect_and_send() {
        let mut server = Server::new_async().await;
        let token = server
            .mock("POST", "/tenant-1/oauth2/v2.0/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                Matcher::UrlEncoded("client_id".into(), "client-1".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"tok-abc","expires_in":3600,"token_type":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;
        let ingest = server
            .mock("POST", "/v1/rest/ingest/logs/container")
            .match_query(Matcher::UrlEncoded("streamFormat".into(), "multijson".into()))
            .match_header("authorization", "Bearer tok-abc")
            .with_status(200)
            .expect(2)
            .create_async()
            .await;

        let mut sender = CloudIngestSender::connect(&settings(&server.url())).await.unwrap();
        assert_eq!(sender.state(), ConnectionState::Connected);

        assert!(sender.send(&record()).await.is_delivered());
        assert!(sender.send(&record()).await.is_delivered());

        // Cached token reused for the second send
        token.assert_async().await;
        ingest.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_credentials_leave_sender_failed() {
        let mut server = Server::new_async().await;
        let _token = server
            .mock("POST", "/tenant-1/oauth2/v2.0/token")
            .with_status(401)
            .create_async()
            .await;

        let mut sender = CloudIngestSender::connect(&settings(&server.url())).await.unwrap();
        assert_eq!(sender.state(), ConnectionState::Failed);
        assert!(sender.last_error().unwrap().contains("rejected"));

        let result = sender.send(&record()).await;
        assert!(matches!(result, DeliveryResult::Fatal { .. }));
    }

    #[tokio::test]
    async fn test_mapping_is_passed() {
        let mut server = Server::new_async().await;
        let _token = server
            .mock("POST", "/tenant-1/oauth2/v2.0/token")
            .with_status(200)
            .with_body(r#"{"access_token":"t","expires_in":3600}"#)
            .create_async()
            .await;
        let ingest = server
            .mock("POST", "/v1/rest/ingest/logs/container")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("streamFormat".into(), "multijson".into()),
                Matcher::UrlEncoded("mappingName".into(), "json_map".into()),
            ]))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let mut s = settings(&server.url());
        s.mapping = Some("json_map".into());
        let mut sender = CloudIngestSender::connect(&s).await.unwrap();
        assert!(sender.send(&record()).await.is_delivered());
        ingest.assert_async().await;
    }

    #[tokio::test]
    async fn test_throttled_ingest_is_retriable() {
        let mut server = Server::new_async().await;
        let _token = server
            .mock("POST", "/tenant-1/oauth2/v2.0/token")
            .with_status(200)
            .with_body(r#"{"access_token":"t","expires_in":3600}"#)
            .create_async()
            .await;
        let _ingest = server
            .mock("POST", "/v1/rest/ingest/logs/container")
            .match_query(Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let mut sender = CloudIngestSender::connect(&settings(&server.url())).await.unwrap();
        let result = sender.send(&record()).await;
        assert!(matches!(result, DeliveryResult::Retriable { .. }));
        assert_eq!(sender.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut sender = CloudIngestSender::new(&settings("http://127.0.0.1:1")).unwrap();
        sender.close().await;
        sender.close().await;
        assert_eq!(sender.state(), ConnectionState::Disconnected);
        assert!(matches!(
            sender.send(&record()).await,
            DeliveryResult::Retriable { .. }
        ));
    }
}
