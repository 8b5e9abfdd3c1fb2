//! Engine configuration loaded from TOML.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error as ThisError;

/// Default number of child keys discovered per relation page.
pub const DEFAULT_PAGE_SIZE: usize = 32;

///
/// ConfigError
///

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {message}")]
    Io { path: PathBuf, message: String },

    #[error("invalid config toml: {0}")]
    Parse(String),

    #[error("invalid config value for '{key}': {message}")]
    Invalid { key: &'static str, message: String },
}

///
/// EngineConfig
///

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub relation: RelationConfig,
    pub crypto: CryptoConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "engine config loaded");

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relation.page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "relation.page_size",
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

///
/// RelationConfig
///

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelationConfig {
    pub page_size: usize,
}

impl Default for RelationConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

///
/// CryptoConfig
///

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CryptoConfig {
    /// Base directory for relative key file paths.
    pub key_dir: Option<PathBuf>,
}

///
/// TESTS
///
