//! Error types for confmount-writer.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from a publish.
#[derive(Debug, Error)]
pub enum WriteError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A projection path that cannot be published as a top-level key.
    #[error("invalid projection path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },
}

/// Convenience constructor for [`WriteError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> WriteError {
    WriteError::Io {
        path: path.into(),
        source,
    }
}
