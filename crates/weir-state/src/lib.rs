//! # Weir State
//!
//! Local state store management for one partition of a stateful task.
//!
//! Every logged store records its mutations in a durable changelog stream.
//! [`TaskStorageManager`] keeps the local copies and the changelogs
//! consistent across restarts:
//!
//! - on `init`, a locally cached directory is reused when its `OFFSET`
//!   checkpoint is present, non-empty and fresher than the changelog's
//!   delete-retention window; otherwise the store is rebuilt by replaying
//!   the changelog from its oldest offset;
//! - on `flush`/`stop`, the newest changelog offset is checkpointed into the
//!   `OFFSET` file, which is the validity certificate the next incarnation
//!   trusts.
//!
//! The message system and the store engines stay behind the seams in
//! [`system`] and [`store`]; [`testing`] provides in-memory implementations
//! of both.

pub mod config;
pub mod dirs;
pub mod error;
pub mod manager;
pub mod offset_file;
pub mod paths;
pub mod restore;
pub mod store;
pub mod system;
pub mod task;
pub mod testing;

pub use config::{StorageConfig, DEFAULT_CHANGELOG_DELETE_RETENTION_MS};
pub use error::{Result, StateError};
pub use manager::TaskStorageManager;
pub use restore::ChangelogIterator;
pub use store::{StorageEngine, StoreDefinition, StoreProperties};
pub use system::{
    IncomingMessage, StreamMetadata, StreamPartitionMetadata, SystemAdmin, SystemConsumer,
};
pub use task::{Partition, StreamPartition, SystemStream, TaskName};
