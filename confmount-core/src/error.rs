//! Error types for confmount-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while naming, fetching or decoding a resource.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The resource name given on the command line is unusable.
    #[error("invalid resource reference '{input}': {reason}")]
    InvalidReference { input: String, reason: &'static str },

    /// The named resource does not exist in the store.
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },

    /// The store cannot be reached (missing root, closed stream, ...).
    #[error("snapshot source unavailable for {key}: {reason}")]
    Unavailable { key: String, reason: String },

    /// Underlying I/O failure with the path that caused it.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on a manifest, with its path.
    #[error("failed to parse manifest at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A base64-encoded value could not be decoded.
    #[error("invalid base64 value for key '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: base64::DecodeError,
    },

    /// The manifest describes a different kind or name than was requested.
    #[error("manifest mismatch: expected {expected}, found {found}")]
    Mismatch { expected: String, found: String },
}

impl ResourceError {
    /// Whether this error means the resource is absent rather than unreadable.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResourceError::NotFound { .. })
    }
}

/// Convenience constructor for [`ResourceError::Io`].
pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ResourceError {
    ResourceError::Io {
        path: path.into(),
        source,
    }
}
