//! Backend identity, routing sets and per-send outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backend kind
///
/// One slot per kind is held by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// HTTPS log-ingestion endpoint with a client certificate (primary sink)
    Https,
    /// Local log-relay daemon reached over a Unix-domain socket
    Relay,
    /// Cloud data-explorer streaming ingestion
    CloudIngest,
}

impl BackendKind {
    /// All kinds, in slot order
    pub const ALL: [BackendKind; 3] = [Self::Https, Self::Relay, Self::CloudIngest];

    /// Stable label used in logs and metric tags
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Https => "https",
            Self::Relay => "relay",
            Self::CloudIngest => "cloud_ingest",
        }
    }

    /// Position in [`BackendKind::ALL`]
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Whether the process cannot run without this backend
    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Https)
    }

    fn bit(self) -> u8 {
        match self {
            Self::Https => 0b001,
            Self::Relay => 0b010,
            Self::CloudIngest => 0b100,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "https" => Ok(Self::Https),
            "relay" => Ok(Self::Relay),
            "cloud_ingest" | "cloud" => Ok(Self::CloudIngest),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

/// Set of backends a record may be delivered to
///
/// Copy-sized bit set, used as the routing hint on every [`crate::Record`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BackendSet(u8);

impl BackendSet {
    /// Empty set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every backend kind
    pub fn all() -> Self {
        BackendKind::ALL.into_iter().collect()
    }

    /// Set holding a single kind
    pub fn only(kind: BackendKind) -> Self {
        Self(kind.bit())
    }

    pub fn with(mut self, kind: BackendKind) -> Self {
        self.insert(kind);
        self
    }

    pub fn insert(&mut self, kind: BackendKind) {
        self.0 |= kind.bit();
    }

    pub fn remove(&mut self, kind: BackendKind) {
        self.0 &= !kind.bit();
    }

    pub fn contains(&self, kind: BackendKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Kinds contained in the set, in slot order
    pub fn iter(&self) -> impl Iterator<Item = BackendKind> + '_ {
        BackendKind::ALL.into_iter().filter(|kind| self.contains(*kind))
    }
}

impl FromIterator<BackendKind> for BackendSet {
    fn from_iter<I: IntoIterator<Item = BackendKind>>(iter: I) -> Self {
        let mut set = Self::empty();
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

impl fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Connection state of a single client instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected yet, or closed
    Disconnected,
    /// Ready to send
    Connected,
    /// Last connect or send failed; the instance must be replaced
    Failed,
}

/// Outcome of sending one record to one backend
///
/// Not persisted; only drives retry and health decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Backend accepted the record
    Delivered,
    /// Transient failure (socket error, timeout, 5xx); reconnect and retry later
    Retriable { reason: String },
    /// Permanent failure (malformed payload, auth rejected); disable the backend
    Fatal { reason: String },
}

impl DeliveryResult {
    pub fn retriable(reason: impl Into<String>) -> Self {
        Self::Retriable {
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// Failure reason, if any
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Delivered => None,
            Self::Retriable { reason } | Self::Fatal { reason } => Some(reason),
        }
    }

    /// Metric tag value
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Retriable { .. } => "retriable",
            Self::Fatal { .. } => "fatal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_set_membership() {
        let set = BackendSet::only(BackendKind::Https).with(BackendKind::CloudIngest);
        assert!(set.contains(BackendKind::Https));
        assert!(!set.contains(BackendKind::Relay));
        assert!(set.contains(BackendKind::CloudIngest));
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![BackendKind::Https, BackendKind::CloudIngest]
        );
    }

    #[test]
    fn test_backend_set_remove() {
        let mut set = BackendSet::all();
        set.remove(BackendKind::Relay);
        assert_eq!(set.len(), 2);
        assert!(!set.contains(BackendKind::Relay));
        assert!(BackendSet::empty().is_empty());
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("HTTPS".parse::<BackendKind>(), Ok(BackendKind::Https));
        assert_eq!("cloud".parse::<BackendKind>(), Ok(BackendKind::CloudIngest));
        assert!("kafka".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_delivery_result_labels() {
        assert_eq!(DeliveryResult::Delivered.outcome(), "delivered");
        let r = DeliveryResult::retriable("socket closed");
        assert_eq!(r.outcome(), "retriable");
        assert_eq!(r.reason(), Some("socket closed"));
        assert_eq!(DeliveryResult::fatal("403").outcome(), "fatal");
    }
}
