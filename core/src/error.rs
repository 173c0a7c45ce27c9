//! Error type shared by every fallible operation in the crate.

use std::path::PathBuf;

use thiserror::Error;


/// Errors surfaced by the codec, the namespace registry, stores and backends.
///
/// None of these are retried internally; each is handed straight back to
/// the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A logical key was empty, or already carried the store's namespace prefix.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A store was configured with a backend kind other than local or session.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// `set_object` was handed something that is not a keyed or ordered collection.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A stored string looked structured but did not parse.
    #[error("malformed stored value {value:?}: {source}")]
    MalformedStoredValue {
        value: String,
        #[source]
        source: serde_json::Error,
    },

    /// A well-formed stored value did not deserialize into the requested type.
    #[error("value for '{key}' does not match the requested type: {source}")]
    TypeMismatch {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The backend refused a write because it would exceed its capacity.
    #[error("quota exceeded writing '{key}': {needed} bytes needed, {limit} allowed")]
    QuotaExceeded {
        key: String,
        needed: usize,
        limit: usize,
    },

    /// Filesystem failure in a persistent backend.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration document could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn invalid_key(message: impl Into<String>) -> Self {
        StoreError::InvalidKey(message.into())
    }

    pub fn malformed(value: &str, source: serde_json::Error) -> Self {
        StoreError::MalformedStoredValue {
            value: value.to_string(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used throughout the crate.
pub type StoreResult<T> = Result<T, StoreError>;
