//! Configuration validation utilities.

use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Parse a dotted version string such as `2.2` or `2.4.1`.
///
/// # Examples
///
/// ```
/// use meterstore::config::parse_version;
///
/// assert_eq!(parse_version("2.2").unwrap(), vec![2, 2]);
/// assert!(parse_version("2.x").is_err());
/// ```
pub fn parse_version(s: &str) -> Result<Vec<i32>, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("version string is empty".to_string());
    }
    s.split('.')
        .map(|part| {
            part.parse::<i32>()
                .ok()
                .filter(|n| *n >= 0)
                .ok_or_else(|| format!("invalid version component '{part}' in '{s}'"))
        })
        .collect()
}

/// Expand environment variables in a string.
/// Supports ${VAR} and ${VAR:-default} syntax.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<Option<regex::Regex>> = std::sync::OnceLock::new();

    let Some(regex) = ENV_VAR_REGEX
        .get_or_init(|| regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").ok())
    else {
        return input.to_string();
    };

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_valid() {
        assert_eq!(parse_version("2.2").unwrap(), vec![2, 2]);
        assert_eq!(parse_version("2.4.1").unwrap(), vec![2, 4, 1]);
        assert_eq!(parse_version(" 3 ").unwrap(), vec![3]);
    }

    #[test]
    fn test_parse_version_invalid() {
        assert!(parse_version("").is_err());
        assert!(parse_version("2.").is_err());
        assert!(parse_version("two.two").is_err());
        assert!(parse_version("2.-1").is_err());
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        assert_eq!(
            expand_env_vars("mongodb://localhost/ceilometer"),
            "mongodb://localhost/ceilometer"
        );
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        let result = expand_env_vars("db2://${NONEXISTENT_DB_HOST_12345:-localhost}:27017/ceilometer");
        assert_eq!(result, "db2://localhost:27017/ceilometer");
    }

    #[test]
    fn test_expand_env_vars_from_env() {
        // SAFETY: This test runs in isolation and only modifies a test-specific variable.
        unsafe {
            std::env::set_var("TEST_METERSTORE_USER", "metering");
        }
        let result = expand_env_vars("mongodb://${TEST_METERSTORE_USER}@localhost/ceilometer");
        assert_eq!(result, "mongodb://metering@localhost/ceilometer");
        // SAFETY: Cleanup test variable.
        unsafe {
            std::env::remove_var("TEST_METERSTORE_USER");
        }
    }
}
