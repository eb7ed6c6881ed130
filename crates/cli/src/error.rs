//! Error types for CLI operations.

use contracts::ContractError;
use dispatcher::DispatcherError;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration could not be loaded or failed validation
    #[error("Invalid configuration: {0}")]
    Config(#[from] ContractError),

    /// Input file could not be opened
    #[error("Failed to open input {path}: {source}")]
    InputOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Dispatcher could not start
    #[error("Dispatcher startup failed: {0}")]
    Dispatcher(#[from] DispatcherError),

    /// Pipeline execution error
    #[error("Pipeline execution failed: {message}")]
    PipelineExecution { message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn input_open(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::InputOpen {
            path: path.into(),
            source,
        }
    }

    pub fn pipeline_execution(message: impl Into<String>) -> Self {
        Self::PipelineExecution {
            message: message.into(),
        }
    }

    /// Errors that take the fatal exit path (report, cooldown, non-zero exit)
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ConfigNotFound { .. } | Self::Config(_) => true,
            Self::Dispatcher(e) => e.is_fatal(),
            Self::InputOpen { .. } | Self::PipelineExecution { .. } => false,
        }
    }

    /// Exception kind reported before a fatal exit
    pub fn exception_kind(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. } | Self::Config(_) => "config_error",
            Self::Dispatcher(
                DispatcherError::PrimaryUnavailable { .. } | DispatcherError::PrimaryLost { .. },
            ) => "primary_backend_unavailable",
            Self::Dispatcher(_) => "dispatcher_error",
            Self::InputOpen { .. } => "input_error",
            Self::PipelineExecution { .. } => "pipeline_error",
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let err = CliError::from(ContractError::config_validation("https_endpoint", "missing"));
        assert!(err.is_fatal());
        assert_eq!(err.exception_kind(), "config_error");

        let err = CliError::input_open("/nope", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("/nope"));
    }
}
