//! Testing utilities: in-memory stand-ins for the message system and for
//! storage engines, so manager behavior can be exercised without external
//! dependencies.

use crate::error::{Result, StateError};
use crate::restore::ChangelogIterator;
use crate::store::{StorageEngine, StoreProperties};
use crate::system::{
    IncomingMessage, StreamMetadata, StreamPartitionMetadata, SystemAdmin, SystemConsumer,
};
use crate::task::{Partition, StreamPartition, SystemStream};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct StreamState {
    partition_count: u32,
    records: HashMap<Partition, Vec<Bytes>>,
}

impl StreamState {
    fn len(&self, partition: Partition) -> usize {
        self.records.get(&partition).map_or(0, Vec::len)
    }
}

#[derive(Default)]
struct MockSystemState {
    streams: HashMap<String, StreamState>,
    registrations: HashMap<StreamPartition, String>,
    cursors: HashMap<StreamPartition, usize>,
    poisoned: HashSet<String>,
}

/// An in-memory message system acting as both the [`SystemAdmin`] and the
/// [`SystemConsumer`] of one named system.
///
/// Offset tokens are the decimal record index within a partition, so `"0"` is
/// always the oldest offset of a non-empty partition.
pub struct MockSystem {
    state: Mutex<MockSystemState>,
    supports_newest_offset: bool,
    starts: AtomicU32,
    stops: AtomicU32,
}

impl MockSystem {
    /// A system whose admin serves single-partition newest-offset lookups.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockSystemState::default()),
            supports_newest_offset: true,
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
        })
    }

    /// A system whose admin only serves full stream metadata, forcing callers
    /// onto the fallback path.
    pub fn without_newest_offset() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockSystemState::default()),
            supports_newest_offset: false,
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
        })
    }

    pub fn create_stream(&self, stream: impl Into<String>, partitions: u32) {
        self.state.lock().streams.insert(
            stream.into(),
            StreamState {
                partition_count: partitions,
                records: HashMap::new(),
            },
        );
    }

    /// Append a record, returning its offset token.
    pub fn produce(
        &self,
        stream: &str,
        partition: Partition,
        payload: impl Into<Bytes>,
    ) -> String {
        let mut state = self.state.lock();
        let stream_state = state
            .streams
            .get_mut(stream)
            .unwrap_or_else(|| panic!("unknown stream: {stream}"));
        let records = stream_state.records.entry(partition).or_default();
        records.push(payload.into());
        (records.len() - 1).to_string()
    }

    /// Make metadata and newest-offset lookups for `stream` fail until
    /// [`MockSystem::heal_stream`] is called.
    pub fn poison_stream(&self, stream: impl Into<String>) {
        self.state.lock().poisoned.insert(stream.into());
    }

    pub fn heal_stream(&self, stream: &str) {
        self.state.lock().poisoned.remove(stream);
    }

    /// Offsets consumers were registered at, keyed by stream partition.
    pub fn registrations(&self) -> HashMap<StreamPartition, String> {
        self.state.lock().registrations.clone()
    }

    pub fn start_count(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    fn partition_metadata(stream_state: &StreamState, partition: Partition) -> StreamPartitionMetadata {
        let len = stream_state.len(partition);
        StreamPartitionMetadata {
            oldest_offset: (len > 0).then(|| "0".to_owned()),
            newest_offset: (len > 0).then(|| (len - 1).to_string()),
            upcoming_offset: Some(len.to_string()),
        }
    }

    fn parse_offset(offset: &str) -> Result<usize> {
        offset
            .parse()
            .map_err(|_| StateError::Metadata(format!("malformed offset token: {offset}")))
    }
}

#[async_trait]
impl SystemAdmin for MockSystem {
    async fn validate_changelog_stream(
        &self,
        stream: &SystemStream,
        expected_partitions: u32,
    ) -> Result<()> {
        let state = self.state.lock();
        let stream_state = state
            .streams
            .get(&stream.stream)
            .ok_or_else(|| StateError::ChangelogValidation(format!("{stream} does not exist")))?;
        if stream_state.partition_count != expected_partitions {
            return Err(StateError::ChangelogValidation(format!(
                "{stream} has {} partitions, expected {expected_partitions}",
                stream_state.partition_count
            )));
        }
        Ok(())
    }

    async fn fetch_stream_metadata(
        &self,
        streams: &[String],
    ) -> Result<HashMap<String, StreamMetadata>> {
        let state = self.state.lock();
        let mut result = HashMap::new();
        for stream in streams {
            if state.poisoned.contains(stream) {
                return Err(StateError::Metadata(format!(
                    "injected metadata failure for {stream}"
                )));
            }
            let Some(stream_state) = state.streams.get(stream) else {
                continue;
            };
            let partitions = (0..stream_state.partition_count)
                .map(Partition)
                .map(|p| (p, Self::partition_metadata(stream_state, p)))
                .collect();
            result.insert(stream.clone(), StreamMetadata { partitions });
        }
        Ok(result)
    }

    async fn offset_after(&self, _ssp: &StreamPartition, offset: &str) -> Result<String> {
        Ok((Self::parse_offset(offset)? + 1).to_string())
    }

    fn supports_newest_offset(&self) -> bool {
        self.supports_newest_offset
    }

    async fn newest_offset(&self, ssp: &StreamPartition, _retries: u32) -> Result<Option<String>> {
        let state = self.state.lock();
        if state.poisoned.contains(&ssp.stream) {
            return Err(StateError::Metadata(format!(
                "injected newest-offset failure for {}",
                ssp.stream
            )));
        }
        let stream_state = state
            .streams
            .get(&ssp.stream)
            .ok_or_else(|| StateError::Metadata(format!("unknown stream: {}", ssp.stream)))?;
        let len = stream_state.len(ssp.partition);
        Ok((len > 0).then(|| (len - 1).to_string()))
    }
}

#[async_trait]
impl SystemConsumer for MockSystem {
    async fn register(&self, ssp: &StreamPartition, offset: &str) -> Result<()> {
        let cursor = Self::parse_offset(offset)?;
        let mut state = self.state.lock();
        state.registrations.insert(ssp.clone(), offset.to_owned());
        state.cursors.insert(ssp.clone(), cursor);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn poll(&self, ssp: &StreamPartition, timeout: Duration) -> Result<Vec<IncomingMessage>> {
        let batch = {
            let mut state = self.state.lock();
            let cursor = *state.cursors.get(ssp).unwrap_or(&0);
            let available: Vec<IncomingMessage> = state
                .streams
                .get(&ssp.stream)
                .and_then(|s| s.records.get(&ssp.partition))
                .map(|records| {
                    records
                        .iter()
                        .enumerate()
                        .skip(cursor)
                        .map(|(index, payload)| IncomingMessage {
                            ssp: ssp.clone(),
                            offset: index.to_string(),
                            key: None,
                            payload: payload.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            state.cursors.insert(ssp.clone(), cursor + available.len());
            available
        };
        if batch.is_empty() {
            // Emulate a blocking poll that times out with nothing buffered.
            tokio::time::sleep(timeout).await;
        }
        Ok(batch)
    }
}

/// A storage engine that records what the manager does to it.
pub struct MockStorageEngine {
    properties: StoreProperties,
    restored: Mutex<Vec<IncomingMessage>>,
    flushes: AtomicU32,
    stops: AtomicU32,
}

impl MockStorageEngine {
    /// Logged store persisted to local disk.
    pub fn persisted() -> Arc<Self> {
        Self::with_properties(StoreProperties {
            is_logged_store: true,
            is_persisted_to_disk: true,
        })
    }

    /// Logged store kept purely in memory.
    pub fn in_memory_logged() -> Arc<Self> {
        Self::with_properties(StoreProperties {
            is_logged_store: true,
            is_persisted_to_disk: false,
        })
    }

    /// Non-logged scratch store.
    pub fn ephemeral() -> Arc<Self> {
        Self::with_properties(StoreProperties {
            is_logged_store: false,
            is_persisted_to_disk: false,
        })
    }

    pub fn with_properties(properties: StoreProperties) -> Arc<Self> {
        Arc::new(Self {
            properties,
            restored: Mutex::new(Vec::new()),
            flushes: AtomicU32::new(0),
            stops: AtomicU32::new(0),
        })
    }

    /// Offsets of every record replayed into this engine, in arrival order.
    pub fn restored_offsets(&self) -> Vec<String> {
        self.restored.lock().iter().map(|m| m.offset.clone()).collect()
    }

    pub fn flush_count(&self) -> u32 {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageEngine for MockStorageEngine {
    fn properties(&self) -> StoreProperties {
        self.properties
    }

    async fn restore(&self, changelog: &mut ChangelogIterator) -> Result<()> {
        while let Some(message) = changelog.next().await? {
            self.restored.lock().push(message);
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
