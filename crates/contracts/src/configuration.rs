//! Configuration - ConfigStore output
//!
//! Flat string-to-string mapping, built once at startup and read-only afterwards.

use std::collections::HashMap;
use std::str::FromStr;

use crate::ContractError;

/// Parsed `key=value` configuration
///
/// Built with `FromIterator`; when a key repeats, the last occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    entries: HashMap<String, String>,
}

impl Configuration {
    /// Empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Value for `key`, or `default` if absent
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Value for `key`; absent and empty values are both `None`
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse the value for `key`
    ///
    /// # Errors
    /// Returns a validation error naming the key when the value does not parse.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>, ContractError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.non_empty(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
                ContractError::config_validation(key, format!("invalid value '{raw}': {e}"))
            }),
        }
    }

    /// Parse the value for `key`, falling back to `default`
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ContractError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse(key)?.unwrap_or(default))
    }

    /// Boolean flag (`true/false`, `yes/no`, `1/0`, `on/off`)
    pub fn flag(&self, key: &str) -> Result<Option<bool>, ContractError> {
        match self.non_empty(key) {
            None => Ok(None),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(Some(true)),
                "false" | "no" | "0" | "off" => Ok(Some(false)),
                _ => Err(ContractError::config_validation(
                    key,
                    format!("expected a boolean, got '{raw}'"),
                )),
            },
        }
    }
}

impl FromIterator<(String, String)> for Configuration {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Configuration {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}
