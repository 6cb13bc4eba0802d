//! Change detection and event dispatch.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use confmount_core::{ChangeKind, Snapshot, WatchEvent};

use crate::queue::WorkQueue;
use crate::stats::ControllerStats;

/// Local mirror of the watched resource, keyed by `<namespace>/<name>`.
pub type SnapshotCache = Arc<RwLock<HashMap<String, Snapshot>>>;

/// Whether `incoming` must be re-published given the cached `previous`.
///
/// Only the data map counts; a bumped resource version with identical data is
/// not a change.
pub fn should_apply(previous: Option<&Snapshot>, incoming: &Snapshot) -> bool {
    match previous {
        None => true,
        Some(previous) => !previous.content_eq(incoming),
    }
}

/// Apply one change-stream event to the cache and enqueue `key` when the
/// content changed. Returns whether the key was enqueued.
pub fn dispatch(
    cache: &SnapshotCache,
    queue: &WorkQueue<String>,
    stats: &ControllerStats,
    key: &str,
    event: WatchEvent,
) -> bool {
    let mut cache = cache.write().unwrap_or_else(PoisonError::into_inner);
    match event.kind {
        ChangeKind::Added | ChangeKind::Modified => {
            let apply = should_apply(cache.get(key), &event.snapshot);
            let version = event.snapshot.resource_version.clone();
            cache.insert(key.to_string(), event.snapshot);
            drop(cache);

            if apply {
                let acknowledged = stats.acknowledge();
                tracing::info!(
                    key,
                    change = ?event.kind,
                    resource_version = %version,
                    acknowledged,
                    "queued change",
                );
                queue.add(key.to_string());
            } else {
                tracing::debug!(
                    key,
                    resource_version = %version,
                    "data unchanged, skipping",
                );
            }
            apply
        }
        ChangeKind::Deleted => {
            cache.remove(key);
            tracing::info!(key, "resource deleted; keeping last published files");
            false
        }
    }
}
