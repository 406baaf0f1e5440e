//! Application configuration structures.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::storage::db::ConnectionUrl;

use super::validation::{ConfigError, expand_env_vars, parse_version};

// =============================================================================
// Constants
// =============================================================================

/// Default minimum backend version.
pub const DEFAULT_MINIMUM_VERSION: &str = "2.2";

fn default_minimum_version() -> String {
    DEFAULT_MINIMUM_VERSION.to_string()
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Backend connection URL (`db2://`, `mongodb://` or `memory://`).
    pub connection: String,

    /// Oldest accepted backend version (default: "2.2").
    #[serde(default = "default_minimum_version")]
    pub minimum_version: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection: "db2://localhost:27017/ceilometer".to_string(),
            minimum_version: default_minimum_version(),
        }
    }
}

impl DatabaseConfig {
    /// `minimum_version` as numeric components.
    pub fn minimum_version_array(&self) -> Result<Vec<i32>, String> {
        parse_version(&self.minimum_version)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConnectionUrl::parse(&self.connection).map_err(|e| {
            ConfigError::ValidationError(format!("database connection: {e}"))
        })?;

        self.minimum_version_array().map_err(|e| {
            ConfigError::ValidationError(format!("database minimum_version: {e}"))
        })?;

        Ok(())
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` and `${VAR:-default}` references in the connection URL are
    /// expanded from the environment.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(content)?;
        config.database.connection = expand_env_vars(&config.database.connection);
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()
    }
}
