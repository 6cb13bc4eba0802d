use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use confmount_core::manifest::{load_snapshot, manifest_path};
use confmount_core::{ChangeKind, ResourceError, ResourceRef, Snapshot, WatchEvent};

use super::{EventStream, SnapshotSource};
use crate::error::{io_err, ControllerError};

/// Manifest store on the local filesystem: `<root>/<namespace>/<name>.yaml`.
///
/// The change stream is driven by filesystem notifications on the namespace
/// directory. Manifests without `metadata.resourceVersion` get one derived
/// from the file's modification time.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn load(&self, resource: &ResourceRef) -> Result<Snapshot, ResourceError> {
        if !self.root.is_dir() {
            return Err(ResourceError::Unavailable {
                key: resource.key(),
                reason: format!("store directory {} does not exist", self.root.display()),
            });
        }
        let path = manifest_path(&self.root, resource);
        load_snapshot(&path, resource, || mtime_version(&path))
    }
}

fn mtime_version(path: &Path) -> String {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|since| since.as_nanos().to_string())
        .unwrap_or_else(|| "0".to_string())
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    )
}

fn touches_manifest(event: &Event, file_name: &str) -> bool {
    event
        .paths
        .iter()
        .any(|path| path.file_name().and_then(|n| n.to_str()) == Some(file_name))
}

/// Re-read the manifest and turn the result into a change event, tracking
/// whether the object was known so additions and deletions are told apart.
fn reload(source: &FileSource, resource: &ResourceRef, known: &mut bool) -> Option<WatchEvent> {
    match source.load(resource) {
        Ok(snapshot) => {
            let kind = if *known {
                ChangeKind::Modified
            } else {
                ChangeKind::Added
            };
            *known = true;
            Some(WatchEvent::new(kind, snapshot))
        }
        Err(err) if err.is_not_found() => {
            if std::mem::take(known) {
                Some(WatchEvent::new(ChangeKind::Deleted, Snapshot::default()))
            } else {
                None
            }
        }
        Err(err) => {
            tracing::warn!(resource = %resource, error = %err, "manifest reload failed");
            None
        }
    }
}

#[async_trait]
impl SnapshotSource for FileSource {
    async fn fetch(&self, resource: &ResourceRef) -> Result<Snapshot, ResourceError> {
        let source = self.clone();
        let resource = resource.clone();
        let key = resource.key();
        tokio::task::spawn_blocking(move || source.load(&resource))
            .await
            .map_err(|err| ResourceError::Unavailable {
                key,
                reason: format!("fetch task join failure: {err}"),
            })?
    }

    async fn subscribe(&self, resource: &ResourceRef) -> Result<EventStream, ControllerError> {
        let namespace_dir = self.root.join(&resource.namespace);
        fs::create_dir_all(&namespace_dir).map_err(|e| io_err(&namespace_dir, e))?;
        let file_name = format!("{}.yaml", resource.name);

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
            let _ = raw_tx.send(event);
        })?;
        watcher.watch(&namespace_dir, RecursiveMode::NonRecursive)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let source = self.clone();
        let resource = resource.clone();
        let (initial, mut known) = {
            let source = source.clone();
            let resource = resource.clone();
            tokio::task::spawn_blocking(move || {
                let mut known = false;
                let event = reload(&source, &resource, &mut known);
                (event, known)
            })
            .await
            .map_err(|err| ControllerError::Join {
                task: "subscribe",
                reason: err.to_string(),
            })?
        };
        if let Some(event) = initial {
            let _ = tx.send(event);
        }

        tokio::spawn(async move {
            // The watcher lives as long as this task.
            let _watcher = watcher;
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    raw = raw_rx.recv() => {
                        let Some(raw) = raw else { break };
                        let event = match raw {
                            Ok(event) => event,
                            Err(err) => {
                                tracing::warn!(error = %err, "watcher event error");
                                continue;
                            }
                        };
                        if !is_relevant_event_kind(&event.kind) || !touches_manifest(&event, &file_name) {
                            continue;
                        }
                        let reloaded = {
                            let source = source.clone();
                            let resource = resource.clone();
                            tokio::task::spawn_blocking(move || {
                                let event = reload(&source, &resource, &mut known);
                                (event, known)
                            })
                            .await
                        };
                        match reloaded {
                            Ok((event, now_known)) => {
                                known = now_known;
                                if let Some(event) = event {
                                    if tx.send(event).is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(err) => {
                                tracing::error!(error = %err, "manifest reload task failed");
                            }
                        }
                    }
                }
            }
            tracing::debug!(resource = %resource, "file watch closed");
        });

        Ok(rx)
    }
}
