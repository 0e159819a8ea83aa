//! Storage engine seam and the per-store descriptor.

use crate::error::Result;
use crate::restore::ChangelogIterator;
use crate::task::SystemStream;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Behavioral flags of a storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreProperties {
    /// Whether mutations of the store are recorded in a changelog stream.
    pub is_logged_store: bool,
    /// Whether the store keeps its state on local disk (as opposed to memory).
    pub is_persisted_to_disk: bool,
}

/// Contract every store engine fulfils towards the storage manager. The
/// engine's internals are opaque here.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    fn properties(&self) -> StoreProperties;

    /// Replay changelog records into the store. Returns once the iterator is
    /// drained, i.e. the store has caught up to the changelog tail.
    async fn restore(&self, changelog: &mut ChangelogIterator) -> Result<()>;

    async fn flush(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// One store attached to a task.
#[derive(Clone)]
pub struct StoreDefinition {
    pub name: String,
    pub engine: Arc<dyn StorageEngine>,
    /// Stream recording this store's mutations, when the store is logged.
    pub changelog: Option<SystemStream>,
    /// Per-store override of the changelog delete-retention window.
    pub delete_retention: Option<Duration>,
}

impl StoreDefinition {
    pub fn new(name: impl Into<String>, engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            name: name.into(),
            engine,
            changelog: None,
            delete_retention: None,
        }
    }

    pub fn with_changelog(mut self, changelog: SystemStream) -> Self {
        self.changelog = Some(changelog);
        self
    }

    pub fn with_delete_retention(mut self, retention: Duration) -> Self {
        self.delete_retention = Some(retention);
        self
    }
}

impl fmt::Debug for StoreDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreDefinition")
            .field("name", &self.name)
            .field("properties", &self.engine.properties())
            .field("changelog", &self.changelog)
            .field("delete_retention", &self.delete_retention)
            .finish()
    }
}
