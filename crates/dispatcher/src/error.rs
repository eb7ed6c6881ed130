//! Dispatcher error types

use std::time::Duration;

use client_factory::FactoryError;
use contracts::BackendKind;
use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Buffer still full after the enqueue timeout (block policy)
    #[error("buffer full, record {record_id} rejected after {waited:?}")]
    BufferFull { record_id: u64, waited: Duration },

    /// Buffer closed for new records
    #[error("buffer closed, record {record_id} rejected")]
    BufferClosed { record_id: u64 },

    /// Primary backend could not be built
    #[error("primary backend {kind} unavailable: {source}")]
    PrimaryUnavailable {
        kind: BackendKind,
        #[source]
        source: FactoryError,
    },

    /// Primary backend became unbuildable while running
    #[error("primary backend {kind} lost: {reason}")]
    PrimaryLost { kind: BackendKind, reason: String },

    /// No backend enabled at all
    #[error("no backend configured")]
    NoBackends,

    /// Factory error
    #[error(transparent)]
    Factory(#[from] FactoryError),
}

impl DispatcherError {
    /// Whether the caller should terminate the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PrimaryUnavailable { .. } | Self::PrimaryLost { .. } | Self::NoBackends
        )
    }
}
