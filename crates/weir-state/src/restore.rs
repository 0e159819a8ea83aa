//! Consumer-backed iteration over a changelog tail during restoration.

use crate::error::Result;
use crate::system::{IncomingMessage, SystemConsumer};
use crate::task::StreamPartition;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// How long a single consumer poll waits before the iterator re-polls.
const POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// Lazy pull over the records of one changelog stream partition, sourced from
/// a running consumer.
///
/// `next` waits while the consumer has nothing buffered and signals the end
/// once the record at `end_offset` (the newest offset captured when
/// restoration began) has been yielded. The sequence is finite,
/// non-restartable, and single-consumer: the owning store's `restore` drains
/// it on the task thread.
pub struct ChangelogIterator {
    consumer: Arc<dyn SystemConsumer>,
    ssp: StreamPartition,
    end_offset: Option<String>,
    buffered: VecDeque<IncomingMessage>,
    done: bool,
}

impl ChangelogIterator {
    pub fn new(
        consumer: Arc<dyn SystemConsumer>,
        ssp: StreamPartition,
        end_offset: Option<String>,
    ) -> Self {
        // No known end means there is nothing to replay.
        let done = end_offset.is_none();
        Self {
            consumer,
            ssp,
            end_offset,
            buffered: VecDeque::new(),
            done,
        }
    }

    pub fn ssp(&self) -> &StreamPartition {
        &self.ssp
    }

    /// Next record in changelog order, or `None` once the changelog tail has
    /// been drained.
    pub async fn next(&mut self) -> Result<Option<IncomingMessage>> {
        if self.done {
            return Ok(None);
        }
        loop {
            if let Some(message) = self.buffered.pop_front() {
                if Some(message.offset.as_str()) == self.end_offset.as_deref() {
                    self.done = true;
                }
                return Ok(Some(message));
            }
            let batch = self.consumer.poll(&self.ssp, POLL_TIMEOUT).await?;
            self.buffered.extend(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Partition, SystemStream};
    use crate::testing::MockSystem;

    fn ssp() -> StreamPartition {
        SystemStream::new("test", "orders-changelog").partition(Partition(0))
    }

    #[tokio::test]
    async fn test_drains_up_to_end_offset() {
        let system = MockSystem::new();
        system.create_stream("orders-changelog", 1);
        for i in 0..5u32 {
            system.produce("orders-changelog", Partition(0), format!("v{i}"));
        }

        let mut iterator = ChangelogIterator::new(system, ssp(), Some("4".to_owned()));
        let mut offsets = Vec::new();
        while let Some(message) = iterator.next().await.unwrap() {
            offsets.push(message.offset);
        }
        assert_eq!(offsets, ["0", "1", "2", "3", "4"]);

        // Exhausted iterators stay exhausted.
        assert!(iterator.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stops_at_captured_end_even_if_more_arrives() {
        let system = MockSystem::new();
        system.create_stream("orders-changelog", 1);
        for i in 0..3u32 {
            system.produce("orders-changelog", Partition(0), format!("v{i}"));
        }

        let mut iterator = ChangelogIterator::new(system.clone(), ssp(), Some("2".to_owned()));
        assert_eq!(iterator.next().await.unwrap().unwrap().offset, "0");

        // Records appended mid-restore are not part of this restoration.
        system.produce("orders-changelog", Partition(0), "late");

        assert_eq!(iterator.next().await.unwrap().unwrap().offset, "1");
        assert_eq!(iterator.next().await.unwrap().unwrap().offset, "2");
        assert!(iterator.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_end_offset_is_immediately_exhausted() {
        let system = MockSystem::new();
        system.create_stream("orders-changelog", 1);

        let mut iterator = ChangelogIterator::new(system, ssp(), None);
        assert!(iterator.next().await.unwrap().is_none());
    }
}
