use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use confmount_core::{ChangeKind, ResourceError, ResourceRef, Snapshot, WatchEvent};

use super::{EventStream, SnapshotSource};
use crate::error::ControllerError;

#[derive(Default)]
struct MemoryState {
    objects: HashMap<String, Snapshot>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<WatchEvent>>>,
    version: u64,
}

impl MemoryState {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn broadcast(&mut self, key: &str, event: WatchEvent) {
        if let Some(subscribers) = self.subscribers.get_mut(key) {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

/// In-process object store. Every mutation bumps a global resource version
/// and is pushed to the subscribers of that object.
#[derive(Clone, Default)]
pub struct MemorySource {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or replace the data of `resource`. Returns the new version.
    pub fn put(&self, resource: &ResourceRef, data: BTreeMap<String, Vec<u8>>) -> String {
        let key = resource.key();
        let mut state = self.lock();
        let version = state.next_version();
        let snapshot = Snapshot::new(data, version.clone());
        let kind = match state.objects.insert(key.clone(), snapshot.clone()) {
            Some(_) => ChangeKind::Modified,
            None => ChangeKind::Added,
        };
        state.broadcast(&key, WatchEvent::new(kind, snapshot));
        version
    }

    /// Bump the version of `resource` without touching its data.
    pub fn touch(&self, resource: &ResourceRef) -> Option<String> {
        let key = resource.key();
        let mut state = self.lock();
        let data = state.objects.get(&key)?.data.clone();
        let version = state.next_version();
        let snapshot = Snapshot::new(data, version.clone());
        state.objects.insert(key.clone(), snapshot.clone());
        state.broadcast(&key, WatchEvent::new(ChangeKind::Modified, snapshot));
        Some(version)
    }

    pub fn delete(&self, resource: &ResourceRef) -> bool {
        let key = resource.key();
        let mut state = self.lock();
        match state.objects.remove(&key) {
            Some(last) => {
                state.broadcast(&key, WatchEvent::new(ChangeKind::Deleted, last));
                true
            }
            None => false,
        }
    }

    /// End every open change stream.
    pub fn disconnect(&self) {
        self.lock().subscribers.clear();
    }

    pub fn subscriber_count(&self, resource: &ResourceRef) -> usize {
        self.lock()
            .subscribers
            .get(&resource.key())
            .map_or(0, |subscribers| {
                subscribers.iter().filter(|tx| !tx.is_closed()).count()
            })
    }
}

#[async_trait]
impl SnapshotSource for MemorySource {
    async fn fetch(&self, resource: &ResourceRef) -> Result<Snapshot, ResourceError> {
        self.lock()
            .objects
            .get(&resource.key())
            .cloned()
            .ok_or_else(|| ResourceError::NotFound {
                kind: resource.kind.to_string(),
                key: resource.key(),
            })
    }

    async fn subscribe(&self, resource: &ResourceRef) -> Result<EventStream, ControllerError> {
        let key = resource.key();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if let Some(current) = state.objects.get(&key) {
            let _ = tx.send(WatchEvent::new(ChangeKind::Added, current.clone()));
        }
        state.subscribers.entry(key).or_default().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confmount_core::ResourceKind;

    fn cfg() -> ResourceRef {
        ResourceRef::new(ResourceKind::ConfigMap, "cfg", "ns")
    }

    #[tokio::test]
    async fn subscribe_replays_existing_object_then_streams_changes() {
        let source = MemorySource::new();
        source.put(&cfg(), Snapshot::from_pairs([("a", "1")], "").data);

        let mut rx = source.subscribe(&cfg()).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, ChangeKind::Added);
        assert_eq!(first.snapshot.resource_version, "1");

        source.put(&cfg(), Snapshot::from_pairs([("a", "2")], "").data);
        source.touch(&cfg());
        source.delete(&cfg());
        let kinds: Vec<_> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| e.kind)
        .collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Modified, ChangeKind::Modified, ChangeKind::Deleted]
        );
    }

    #[tokio::test]
    async fn fetch_missing_is_not_found() {
        let source = MemorySource::new();
        let err = source.fetch(&cfg()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn disconnect_ends_streams() {
        let source = MemorySource::new();
        let mut rx = source.subscribe(&cfg()).await.unwrap();
        assert_eq!(source.subscriber_count(&cfg()), 1);
        source.disconnect();
        assert!(rx.recv().await.is_none());
        assert_eq!(source.subscriber_count(&cfg()), 0);
    }
}
