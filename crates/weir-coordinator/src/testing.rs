//! Testing utilities: an in-memory coordination service with ephemeral
//! sequential semantics and synchronous watch delivery.

use crate::error::Result;
use crate::service::{CoordinationService, DataListener};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const CHILD_PREFIX: &str = "participant-";

#[derive(Default)]
struct Tree {
    next_sequence: u64,
    /// Full path → payload.
    nodes: BTreeMap<String, Vec<u8>>,
    /// Full path → attached data watches.
    watches: HashMap<String, Vec<Arc<dyn DataListener>>>,
}

/// In-memory [`CoordinationService`].
///
/// Sequences are allocated from one monotonically increasing counter.
/// Deletion events fire synchronously on the calling thread, which mirrors
/// how a real client delivers watch callbacks on its own event thread.
#[derive(Default)]
pub struct InMemoryCoordinationService {
    tree: Mutex<Tree>,
}

impl InMemoryCoordinationService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// End the session owning `path`: the node is deleted and every watcher
    /// is notified, like an ephemeral node reaped by the service.
    pub fn expire(&self, path: &str) {
        let listeners = {
            let mut tree = self.tree.lock();
            tree.nodes.remove(path);
            tree.watches.get(path).cloned().unwrap_or_default()
        };
        // Dispatch outside the lock so handlers can call back in.
        for listener in listeners {
            listener.on_data_deleted(path);
        }
    }

    /// Delete `path` without notifying watchers, modelling a node that
    /// vanished before any watch could take hold.
    pub fn remove(&self, path: &str) {
        self.tree.lock().nodes.remove(path);
    }

    /// Overwrite a node's payload and notify watchers of the change.
    pub fn update(&self, path: &str, payload: &[u8]) {
        let listeners = {
            let mut tree = self.tree.lock();
            tree.nodes.insert(path.to_owned(), payload.to_vec());
            tree.watches.get(path).cloned().unwrap_or_default()
        };
        for listener in listeners {
            listener.on_data_changed(path);
        }
    }

    /// Number of watches currently attached to `path`.
    pub fn watch_count(&self, path: &str) -> usize {
        self.tree.lock().watches.get(path).map_or(0, Vec::len)
    }
}

impl CoordinationService for InMemoryCoordinationService {
    fn create_ephemeral_sequential(&self, parent: &str, payload: &[u8]) -> Result<String> {
        let mut tree = self.tree.lock();
        let sequence = tree.next_sequence;
        tree.next_sequence += 1;
        let path = format!("{parent}/{CHILD_PREFIX}{sequence:010}");
        tree.nodes.insert(path.clone(), payload.to_vec());
        Ok(path)
    }

    fn get_children(&self, parent: &str) -> Result<Vec<String>> {
        let tree = self.tree.lock();
        let prefix = format!("{parent}/");
        Ok(tree
            .nodes
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_owned)
            .collect())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.tree.lock().nodes.contains_key(path))
    }

    fn subscribe_data_changes(&self, path: &str, listener: Arc<dyn DataListener>) -> Result<()> {
        self.tree
            .lock()
            .watches
            .entry(path.to_owned())
            .or_default()
            .push(listener);
        Ok(())
    }

    fn unsubscribe_data_changes(&self, path: &str, listener: &Arc<dyn DataListener>) -> Result<()> {
        if let Some(listeners) = self.tree.lock().watches.get_mut(path) {
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
        }
        Ok(())
    }
}
