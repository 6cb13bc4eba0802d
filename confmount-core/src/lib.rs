//! confmount core library — resource identity, snapshots, manifests, errors.
//!
//! - [`types`] — [`ResourceRef`], [`Snapshot`], [`FileProjection`], change events
//! - [`namespace`] — ambient namespace fallback
//! - [`manifest`] — YAML manifests for the local store
//! - [`error`] — [`ResourceError`]

pub mod error;
pub mod manifest;
pub mod namespace;
pub mod types;

pub use error::ResourceError;
pub use types::{
    ChangeKind, FileProjection, ResourceKind, ResourceRef, Snapshot, WatchEvent,
    DEFAULT_FILE_MODE,
};
