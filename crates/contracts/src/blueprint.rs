//! ForwarderBlueprint - Config Loader output
//!
//! Typed view of the flat configuration: which backends run, and how the
//! buffer and dispatcher behave.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

use crate::{BackendKind, BackendSet};

/// Well-known relay daemon socket
pub const DEFAULT_RELAY_SOCKET_PATH: &str = "/var/run/mdsd/default_fluent.socket";
pub const DEFAULT_RELAY_TAG: &str = "log_forwarder.container_log";
pub const DEFAULT_CLOUD_AUTHORITY: &str = "https://login.microsoftonline.com";
pub const DEFAULT_HTTPS_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RELAY_WRITE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_CLOUD_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;
pub const DEFAULT_ENQUEUE_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;
pub const DEFAULT_DRAIN_BATCH_SIZE: usize = 256;
pub const DEFAULT_SHUTDOWN_FLUSH_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_FATAL_EXIT_DELAY_SECS: u64 = 30;

/// Complete forwarder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderBlueprint {
    /// Primary HTTPS sink (always present)
    pub https: HttpsSettings,

    /// Relay daemon sink (None = disabled)
    #[serde(default)]
    pub relay: Option<RelaySettings>,

    /// Cloud ingestion sink (None = disabled)
    #[serde(default)]
    pub cloud: Option<CloudIngestSettings>,

    /// Record buffer behaviour
    #[serde(default)]
    pub buffer: BufferSettings,

    /// Dispatcher tuning
    #[serde(default)]
    pub dispatch: DispatchSettings,

    /// Cooldown before a fatal exit (seconds)
    #[serde(default = "default_fatal_exit_delay_secs")]
    pub fatal_exit_delay_secs: u64,
}

fn default_fatal_exit_delay_secs() -> u64 {
    DEFAULT_FATAL_EXIT_DELAY_SECS
}

impl ForwarderBlueprint {
    /// Backends that have a slot in the dispatcher
    pub fn enabled_backends(&self) -> BackendSet {
        let mut set = BackendSet::only(BackendKind::Https);
        if self.relay.is_some() {
            set.insert(BackendKind::Relay);
        }
        if self.cloud.is_some() {
            set.insert(BackendKind::CloudIngest);
        }
        set
    }

    pub fn fatal_exit_delay(&self) -> Duration {
        Duration::from_secs(self.fatal_exit_delay_secs)
    }
}

/// HTTPS sender settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HttpsSettings {
    /// PEM client certificate
    #[validate(length(min = 1, message = "cert_file_path must not be empty"))]
    pub cert_file_path: String,

    /// PEM private key
    #[validate(length(min = 1, message = "key_file_path must not be empty"))]
    pub key_file_path: String,

    /// POST target
    #[validate(url(message = "https_endpoint must be a valid URL"))]
    pub endpoint: String,

    /// Per-request timeout
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,
}

impl HttpsSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Relay socket sender settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RelaySettings {
    #[validate(length(min = 1, message = "relay_socket_path must not be empty"))]
    pub socket_path: String,

    /// Forward-protocol tag attached to every message
    #[validate(length(min = 1, message = "relay_tag must not be empty"))]
    pub tag: String,

    #[validate(range(min = 1, max = 300))]
    pub write_timeout_secs: u64,
}

impl RelaySettings {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            socket_path: DEFAULT_RELAY_SOCKET_PATH.to_string(),
            tag: DEFAULT_RELAY_TAG.to_string(),
            write_timeout_secs: DEFAULT_RELAY_WRITE_TIMEOUT_SECS,
        }
    }
}

/// Cloud ingestion sender settings
#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct CloudIngestSettings {
    /// Cluster URL, e.g. `https://cluster.region.kusto.windows.net`
    #[validate(url(message = "cloud_ingest_endpoint must be a valid URL"))]
    pub endpoint: String,

    #[validate(length(min = 1, message = "cloud_ingest_database must not be empty"))]
    pub database: String,

    #[validate(length(min = 1, message = "cloud_ingest_table must not be empty"))]
    pub table: String,

    #[validate(length(min = 1, message = "cloud_tenant_id must not be empty"))]
    pub tenant_id: String,

    #[validate(length(min = 1, message = "cloud_client_id must not be empty"))]
    pub client_id: String,

    #[serde(skip_serializing, default)]
    #[validate(length(min = 1, message = "cloud_client_secret must not be empty"))]
    pub client_secret: String,

    /// Identity authority base URL
    #[validate(url(message = "cloud_authority must be a valid URL"))]
    pub authority: String,

    /// Optional ingestion mapping reference
    #[serde(default)]
    pub mapping: Option<String>,

    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,
}

impl CloudIngestSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// Keeps the client secret out of logs
impl fmt::Debug for CloudIngestSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudIngestSettings")
            .field("endpoint", &self.endpoint)
            .field("database", &self.database)
            .field("table", &self.table)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("authority", &self.authority)
            .field("mapping", &self.mapping)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Overflow policy (buffer full)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest record to make room
    #[default]
    DropOldest,
    /// Block the producer until space frees up or the enqueue timeout elapses
    Block,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop_oldest" | "drop-oldest" => Ok(Self::DropOldest),
            "block" | "block_with_timeout" => Ok(Self::Block),
            other => Err(format!(
                "unknown overflow policy '{other}' (expected drop_oldest or block)"
            )),
        }
    }
}

/// Record buffer settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BufferSettings {
    #[validate(range(min = 1, max = 10_000_000))]
    pub capacity: usize,

    pub overflow_policy: OverflowPolicy,

    /// Only used by [`OverflowPolicy::Block`]
    #[validate(range(min = 1))]
    pub enqueue_timeout_ms: u64,
}

impl BufferSettings {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            enqueue_timeout_ms: DEFAULT_ENQUEUE_TIMEOUT_MS,
        }
    }
}

/// Dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DispatchSettings {
    /// First reconnect delay
    #[validate(range(min = 1))]
    pub backoff_base_ms: u64,

    /// Reconnect delay ceiling
    #[validate(range(min = 1))]
    pub backoff_cap_ms: u64,

    /// Records taken from the buffer per drain
    #[validate(range(min = 1, max = 100_000))]
    pub drain_batch_size: usize,

    /// Deadline for the final flush on shutdown
    pub shutdown_flush_timeout_secs: u64,
}

impl DispatchSettings {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn shutdown_flush_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_flush_timeout_secs)
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
            drain_batch_size: DEFAULT_DRAIN_BATCH_SIZE,
            shutdown_flush_timeout_secs: DEFAULT_SHUTDOWN_FLUSH_TIMEOUT_SECS,
        }
    }
}
