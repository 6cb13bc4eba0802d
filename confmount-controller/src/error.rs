use std::path::PathBuf;

use thiserror::Error;

use crate::hook::HookError;

/// Error surface for the controller runtime, sources and worker.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("source error: {0}")]
    Source(#[from] confmount_core::ResourceError),

    #[error("write error: {0}")]
    Write(#[from] confmount_writer::WriteError),

    #[error("hook error: {0}")]
    Hook(#[from] HookError),

    #[error("{task} task join failure: {reason}")]
    Join { task: &'static str, reason: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ControllerError {
    ControllerError::Io {
        path: path.into(),
        source,
    }
}
