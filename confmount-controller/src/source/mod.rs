//! Where snapshots come from.
//!
//! A source answers one-shot reads ([`SnapshotSource::fetch`]) and opens a
//! change stream ([`SnapshotSource::subscribe`]). On subscribe, a source emits
//! `Added` for the object if it currently exists, so a fresh subscriber never
//! misses state that predates it.

use async_trait::async_trait;
use tokio::sync::mpsc;

use confmount_core::{ResourceError, ResourceRef, Snapshot, WatchEvent};

use crate::error::ControllerError;

pub mod file;
pub mod memory;

pub use file::FileSource;
pub use memory::MemorySource;

/// Change stream of one resource. Ends when the source drops its sender.
pub type EventStream = mpsc::UnboundedReceiver<WatchEvent>;

#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    /// Current snapshot of `resource`.
    async fn fetch(&self, resource: &ResourceRef) -> Result<Snapshot, ResourceError>;

    /// Open a change stream for `resource`.
    async fn subscribe(&self, resource: &ResourceRef) -> Result<EventStream, ControllerError>;
}
