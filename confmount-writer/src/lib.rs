//! # confmount-writer
//!
//! Atomic, crash-safe publication of a whole file set into one directory.
//!
//! Call [`AtomicWriter::publish`] with the projections of a snapshot; readers
//! of the target directory observe either the previous file set or the new
//! one, never a mix.

pub mod error;
pub mod fingerprint;
pub mod writer;

pub use error::WriteError;
pub use writer::{AtomicWriter, DiskSink, FileSink, PublishOutcome, DATA_DIR_NAME};
