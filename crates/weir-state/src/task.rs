//! Identity types for tasks and the streams they log to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque name of one stateful task. Must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskName(String);

impl TaskName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem form of the task name. Only ASCII spaces are replaced with
    /// underscores; all other characters pass through untouched.
    pub fn sanitized(&self) -> String {
        self.0.replace(' ', "_")
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Partition index of a task's input (and of its changelog streams).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Partition(pub u32);

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stream within a named message system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SystemStream {
    pub system: String,
    pub stream: String,
}

impl SystemStream {
    pub fn new(system: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            stream: stream.into(),
        }
    }

    /// Pin this stream to one partition.
    pub fn partition(&self, partition: Partition) -> StreamPartition {
        StreamPartition {
            system: self.system.clone(),
            stream: self.stream.clone(),
            partition,
        }
    }
}

impl fmt::Display for SystemStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.system, self.stream)
    }
}

/// One partition of one stream: the unit a consumer registers against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamPartition {
    pub system: String,
    pub stream: String,
    pub partition: Partition,
}

impl StreamPartition {
    pub fn system_stream(&self) -> SystemStream {
        SystemStream {
            system: self.system.clone(),
            stream: self.stream.clone(),
        }
    }
}

impl fmt::Display for StreamPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.system, self.stream, self.partition)
    }
}
