//! Controller runtime: snapshot sources, change detection, the work queue,
//! the reconciliation worker and the post-update hook.

pub mod config;
pub mod detector;
mod error;
pub mod hook;
pub mod queue;
mod runtime;
pub mod source;
pub mod stats;

pub use config::ControllerConfig;
pub use detector::{should_apply, SnapshotCache};
pub use error::ControllerError;
pub use hook::{HookError, HookRunner};
pub use queue::WorkQueue;
pub use runtime::{init_tracing, start_blocking, Controller};
pub use source::{EventStream, FileSource, MemorySource, SnapshotSource};
pub use stats::{ControllerStats, StatsSnapshot};
