//! Relay socket sender
//!
//! Writes records to the local relay daemon over a Unix-domain socket,
//! framed as forward-protocol messages: a MessagePack array
//! `[tag, unix_seconds, record_map]`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use contracts::{
    BackendClient, BackendKind, ConnectionState, DeliveryResult, Record, RecordPayload,
    RelaySettings,
};
use serde_json::Map;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Encode one record as a forward-protocol message
///
/// Text payloads become `{"log": <line>}`; structured payloads are sent as is.
pub fn encode_forward_message(
    tag: &str,
    record: &Record,
) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    let time = record.enqueued_at().timestamp();
    match record.payload() {
        RecordPayload::Structured(map) => rmp_serde::to_vec(&(tag, time, map)),
        RecordPayload::Text(_) => {
            let mut map = Map::with_capacity(1);
            map.insert("log".to_string(), record.payload().to_json_value());
            rmp_serde::to_vec(&(tag, time, &map))
        }
    }
}

/// Relay daemon client
pub struct RelaySocketSender {
    socket_path: PathBuf,
    tag: String,
    write_timeout: Duration,
    stream: Option<UnixStream>,
    state: ConnectionState,
    last_error: Option<String>,
}

impl RelaySocketSender {
    /// Connect to the relay socket
    ///
    /// Never fails: an unreachable socket yields a sender in the `Failed`
    /// state whose sends are retriable.
    #[instrument(name = "relay_sender_connect", skip(settings), fields(socket = %settings.socket_path))]
    pub async fn connect(settings: &RelaySettings) -> Self {
        let socket_path = PathBuf::from(&settings.socket_path);
        let write_timeout = settings.write_timeout();

        let (stream, state, last_error) =
            match timeout(write_timeout, UnixStream::connect(&socket_path)).await {
                Ok(Ok(stream)) => {
                    info!("connected to relay socket");
                    (Some(stream), ConnectionState::Connected, None)
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "relay socket connect failed");
                    (None, ConnectionState::Failed, Some(e.to_string()))
                }
                Err(_) => {
                    warn!("relay socket connect timed out");
                    (
                        None,
                        ConnectionState::Failed,
                        Some("connect timed out".to_string()),
                    )
                }
            };

        Self {
            socket_path,
            tag: settings.tag.clone(),
            write_timeout,
            stream,
            state,
            last_error,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn fail(&mut self, result: DeliveryResult) -> DeliveryResult {
        self.state = ConnectionState::Failed;
        self.last_error = result.reason().map(str::to_string);
        result
    }
}

#[async_trait]
impl BackendClient for RelaySocketSender {
    fn kind(&self) -> BackendKind {
        BackendKind::Relay
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[instrument(name = "relay_sender_send", skip(self, record), fields(record_id = record.id()))]
    async fn send(&mut self, record: &Record) -> DeliveryResult {
        let message = match encode_forward_message(&self.tag, record) {
            Ok(message) => message,
            Err(e) => return self.fail(DeliveryResult::fatal(format!("encode failed: {e}"))),
        };

        let Some(stream) = self.stream.as_mut() else {
            let reason = self
                .last_error
                .clone()
                .unwrap_or_else(|| "relay socket not connected".to_string());
            return self.fail(DeliveryResult::retriable(reason));
        };

        let written = timeout(self.write_timeout, stream.write_all(&message)).await;
        match written {
            Ok(Ok(())) => {
                self.state = ConnectionState::Connected;
                DeliveryResult::Delivered
            }
            Ok(Err(e)) => {
                // Broken pipe or reset; the stream is unusable from here on
                self.stream = None;
                self.fail(DeliveryResult::retriable(format!("write failed: {e}")))
            }
            Err(_) => {
                self.stream = None;
                self.fail(DeliveryResult::retriable("write timed out"))
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "relay socket shutdown failed");
            }
            debug!(socket = %self.socket_path.display(), "relay sender closed");
        }
        self.state = ConnectionState::Disconnected;
    }
}
