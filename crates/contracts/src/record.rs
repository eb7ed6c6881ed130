//! Record - producer output, dispatcher input
//!
//! An opaque payload plus a routing hint and an enqueue timestamp.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::borrow::Cow;

use crate::BackendSet;

/// Log record payload
///
/// Producers pick the encoding explicitly; nothing is converted implicitly.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPayload {
    /// Raw log line, forwarded as UTF-8 text
    Text(Bytes),

    /// Structured record (a JSON object)
    Structured(Map<String, Value>),
}

impl RecordPayload {
    /// Classify a raw input line
    ///
    /// A line holding a single JSON object becomes `Structured`, anything else `Text`.
    pub fn from_line(line: impl Into<Bytes>) -> Self {
        let line = line.into();
        if line.first() == Some(&b'{') {
            if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(&line) {
                return Self::Structured(map);
            }
        }
        Self::Text(line)
    }

    /// Text view of a `Text` payload (invalid UTF-8 replaced)
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Text(bytes) => Some(String::from_utf8_lossy(bytes)),
            Self::Structured(_) => None,
        }
    }

    /// Whether a text payload survives UTF-8 conversion unchanged
    pub fn is_lossless(&self) -> bool {
        match self {
            Self::Text(bytes) => std::str::from_utf8(bytes).is_ok(),
            Self::Structured(_) => true,
        }
    }

    /// JSON value used by the HTTP backends
    pub fn to_json_value(&self) -> Value {
        match self {
            Self::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
            Self::Structured(map) => Value::Object(map.clone()),
        }
    }

    /// Approximate payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            Self::Text(bytes) => bytes.len(),
            Self::Structured(map) => map
                .iter()
                .map(|(k, v)| k.len() + v.to_string().len())
                .sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(bytes) => bytes.is_empty(),
            Self::Structured(map) => map.is_empty(),
        }
    }
}

/// A log record
///
/// Immutable after creation; fields are only readable.
#[derive(Debug, Clone)]
pub struct Record {
    id: u64,
    payload: RecordPayload,
    routes: BackendSet,
    enqueued_at: DateTime<Utc>,
}

impl Record {
    /// Create a record stamped with the current time
    pub fn new(id: u64, payload: RecordPayload, routes: BackendSet) -> Self {
        Self::with_timestamp(id, payload, routes, Utc::now())
    }

    /// Create a record with an explicit enqueue timestamp
    pub fn with_timestamp(
        id: u64,
        payload: RecordPayload,
        routes: BackendSet,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            payload,
            routes,
            enqueued_at,
        }
    }

    /// Producer-assigned sequence number (diagnostics only)
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn payload(&self) -> &RecordPayload {
        &self.payload
    }

    /// Backends that accept this record
    pub fn routes(&self) -> BackendSet {
        self.routes
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }
}
