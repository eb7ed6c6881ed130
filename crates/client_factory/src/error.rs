//! Client Factory error types

use contracts::{BackendKind, ContractError};
use thiserror::Error;

/// Client Factory specific error
///
/// Connection problems are not errors here: they produce a client in the
/// `Failed` state. An error means the client cannot be built at all.
#[derive(Debug, Error)]
pub enum FactoryError {
    /// Client certificate or key unusable
    #[error("failed to load client identity from '{path}': {message}")]
    TlsConfig { path: String, message: String },

    /// Backend requested but not configured
    #[error("{kind} backend is not configured")]
    NotConfigured { kind: BackendKind },

    /// HTTP client construction failed
    #[error("failed to build {kind} http client: {message}")]
    HttpClient { kind: BackendKind, message: String },

    /// Wrapped ContractError
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl FactoryError {
    /// Create TLS identity error
    pub fn tls_config(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TlsConfig {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create HTTP client construction error
    pub fn http_client(kind: BackendKind, message: impl Into<String>) -> Self {
        Self::HttpClient {
            kind,
            message: message.into(),
        }
    }

    /// Whether retrying the build can never succeed
    ///
    /// A fatal error on the primary backend terminates the process.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Contract(ContractError::Io(_)))
    }

    /// Metric tag value
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::TlsConfig { .. } => "tls_config",
            Self::NotConfigured { .. } => "not_configured",
            Self::HttpClient { .. } => "http_client",
            Self::Contract(_) => "contract",
        }
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, FactoryError>;
