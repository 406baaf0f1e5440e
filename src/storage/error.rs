//! Storage-specific error types.
//!
//! All storage operations return [`StorageError`] on failure, which can be
//! matched to determine the underlying cause (backend, version, usage, etc.).

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend reported a server version below the supported minimum.
    #[error("unsupported backend version {found}, need at least {required}")]
    BadVersion {
        /// Version reported by the backend.
        found: String,
        /// Minimum version accepted.
        required: String,
    },

    /// A filter field required by the operation was not supplied.
    #[error("missing required {0} specifier")]
    MissingField(&'static str),

    /// Operation is not supported by this backend.
    #[error("{0} not implemented")]
    NotImplemented(&'static str),

    /// Document store operation failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// Configuration handed to the adapter is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connection URL could not be used.
    #[error("invalid connection url: {0}")]
    InvalidUrl(String),

    /// Failed to encode a record as BSON.
    #[error("bson serialization error: {0}")]
    Serialize(#[from] bson::ser::Error),

    /// Failed to decode a stored document.
    #[error("bson deserialization error: {0}")]
    Deserialize(#[from] bson::de::Error),

    /// Invalid data in the store (e.g., unexpected document shape).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Internal error (e.g., poisoned lock).
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// True for operations this backend permanently does not support.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented(_))
    }

    /// True for errors fixed by changing configuration rather than retrying.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::BadVersion { .. } | Self::InvalidUrl(_)
        )
    }

    /// True when the caller passed an incomplete filter.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::MissingField(_))
    }
}
