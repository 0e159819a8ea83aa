use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default tombstone-retention window of a store changelog (one day).
///
/// A locally cached store older than this window may be missing records the
/// changelog has already compacted away, so it cannot be caught up
/// incrementally.
pub const DEFAULT_CHANGELOG_DELETE_RETENTION_MS: u64 = 86_400_000;

/// Configuration for task-local state storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for non-logged (ephemeral) store state.
    pub store_base_dir: PathBuf,

    /// Base directory for logged store state, preserved across runs.
    pub logged_store_base_dir: PathBuf,

    /// Expected partition count of every store changelog stream.
    pub changelog_stream_partitions: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let state_dir = std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("state");
        Self {
            store_base_dir: state_dir.clone(),
            logged_store_base_dir: state_dir,
            changelog_stream_partitions: 1,
        }
    }
}

impl StorageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base directory for non-logged store state.
    pub fn with_store_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_base_dir = dir.into();
        self
    }

    /// Set the base directory for logged store state.
    pub fn with_logged_store_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.logged_store_base_dir = dir.into();
        self
    }

    /// Set the expected changelog stream partition count.
    pub fn with_changelog_stream_partitions(mut self, partitions: u32) -> Self {
        self.changelog_stream_partitions = partitions;
        self
    }
}
