//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse `key=value` configuration files into a [`Configuration`]
//! - Validate the keys each backend needs
//! - Generate a [`ForwarderBlueprint`]
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("/etc/forwarder.conf")).unwrap();
//! println!("endpoint: {}", blueprint.https.endpoint);
//! ```

mod parser;
mod validator;

pub use contracts::{Configuration, ForwarderBlueprint};
pub use parser::parse_line;

use contracts::ContractError;
use std::path::Path;
use tracing::debug;

/// Flat configuration store
///
/// Parses files without any schema knowledge; callers validate what they need.
pub struct ConfigStore;

impl ConfigStore {
    /// Load a configuration file
    ///
    /// An empty path yields an empty configuration.
    ///
    /// # Errors
    /// - File missing or unreadable
    pub fn load(path: &Path) -> Result<Configuration, ContractError> {
        if path.as_os_str().is_empty() {
            return Ok(Configuration::new());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ContractError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;

        let config = Self::load_from_str(&content);
        debug!(path = %path.display(), keys = config.len(), "configuration parsed");
        Ok(config)
    }

    /// Parse configuration content
    pub fn load_from_str(content: &str) -> Configuration {
        parser::parse(content)
    }
}

/// Configuration loader
///
/// Provides static methods to load a validated blueprint from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate a blueprint from a file
    ///
    /// # Errors
    /// - File read failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<ForwarderBlueprint, ContractError> {
        let config = ConfigStore::load(path)?;
        Self::from_configuration(&config)
    }

    /// Load and validate a blueprint from a string
    pub fn load_from_str(content: &str) -> Result<ForwarderBlueprint, ContractError> {
        Self::from_configuration(&ConfigStore::load_from_str(content))
    }

    /// Validate an already parsed configuration
    pub fn from_configuration(config: &Configuration) -> Result<ForwarderBlueprint, ContractError> {
        validator::validate(config)
    }

    /// Serialize ForwarderBlueprint to JSON string (secrets omitted)
    pub fn to_json(blueprint: &ForwarderBlueprint) -> Result<String, ContractError> {
        serde_json::to_string_pretty(blueprint)
            .map_err(|e| ContractError::ConfigParse {
                message: "JSON serialize error".to_string(),
                source: Some(Box::new(e)),
            })
    }
}
