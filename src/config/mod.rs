//! Configuration module.
//!
//! Provides YAML-based configuration loading and validation for the storage
//! connection (backend URL and minimum backend version).

mod app;
mod validation;

pub use app::{AppConfig, DEFAULT_MINIMUM_VERSION, DatabaseConfig};
pub use validation::{ConfigError, expand_env_vars, parse_version};
