//! Seam to the message system: stream metadata, admins, and consumers.
//!
//! These traits are implemented by the message-system integration; the
//! storage manager only depends on the contracts here. [`crate::testing`]
//! ships an in-memory implementation for tests.

use crate::error::{Result, StateError};
use crate::task::{Partition, StreamPartition, SystemStream};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

/// One record read from a changelog stream partition.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub ssp: StreamPartition,
    /// Offset token of this record. Opaque to the storage layer.
    pub offset: String,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

/// Offsets of one stream partition at observation time.
#[derive(Debug, Clone, Default)]
pub struct StreamPartitionMetadata {
    /// Earliest still-retained offset, `None` when the partition is empty.
    pub oldest_offset: Option<String>,
    /// Offset of the last appended record, `None` when the partition is empty.
    pub newest_offset: Option<String>,
    /// Offset the next appended record will receive.
    pub upcoming_offset: Option<String>,
}

/// Per-partition metadata of one stream.
#[derive(Debug, Clone, Default)]
pub struct StreamMetadata {
    pub partitions: HashMap<Partition, StreamPartitionMetadata>,
}

/// Administrative operations of one message system.
#[async_trait]
pub trait SystemAdmin: Send + Sync {
    /// Assert that the changelog stream exists with the expected partition
    /// count. Fails with [`StateError::ChangelogValidation`] on divergence.
    async fn validate_changelog_stream(
        &self,
        stream: &SystemStream,
        expected_partitions: u32,
    ) -> Result<()>;

    /// Fetch metadata for a batch of this system's streams, keyed by stream
    /// name. Streams unknown to the system are absent from the result.
    async fn fetch_stream_metadata(
        &self,
        streams: &[String],
    ) -> Result<HashMap<String, StreamMetadata>>;

    /// Offset immediately after `offset` in the stream's ordering. Used to
    /// resume consumption after a checkpointed offset without re-reading it.
    async fn offset_after(&self, ssp: &StreamPartition, offset: &str) -> Result<String>;

    /// Whether [`SystemAdmin::newest_offset`] is served natively. When false,
    /// callers fall back to [`SystemAdmin::fetch_stream_metadata`].
    fn supports_newest_offset(&self) -> bool {
        false
    }

    /// Newest offset of a single stream partition, retried up to `retries`
    /// times. Only meaningful when [`SystemAdmin::supports_newest_offset`]
    /// returns true.
    async fn newest_offset(&self, ssp: &StreamPartition, retries: u32) -> Result<Option<String>> {
        let _ = retries;
        Err(StateError::Metadata(format!(
            "newest_offset not supported by the admin for {ssp}"
        )))
    }
}

/// Consuming side of one message system.
#[async_trait]
pub trait SystemConsumer: Send + Sync {
    /// Register interest in one stream partition, starting at `offset`
    /// (inclusive). Must be called before [`SystemConsumer::start`].
    async fn register(&self, ssp: &StreamPartition, offset: &str) -> Result<()>;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Buffered records for `ssp`, waiting up to `timeout` when none are
    /// immediately available. An empty result means the wait expired.
    async fn poll(&self, ssp: &StreamPartition, timeout: Duration) -> Result<Vec<IncomingMessage>>;
}
