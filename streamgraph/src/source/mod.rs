//! Message source adapter.
//!
//! A [`LogSource`] is a partitioned, ordered log. Each partition worker owns a
//! [`PartitionConsumer`] that hands out batches in offset order and records
//! durable checkpoints once the driver says a prefix is done.

mod checkpoint;
mod file;
mod memory;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use file::{FileConsumer, FileLog};
pub use memory::{MemoryConsumer, MemoryLog};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{CheckpointError, SourceError};
use crate::model::{Offset, PartitionId, Record};

/// Consumer group used when none is configured.
pub const DEFAULT_GROUP: &str = "streamgraph";

/// Where a partition starts when it has no checkpoint yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOffset {
    /// The first record in the partition.
    #[default]
    Earliest,
    /// Only records appended after the consumer opens.
    Latest,
    /// A fixed offset.
    Explicit(Offset),
}

/// Resolves the first offset to read.
///
/// An existing checkpoint always wins over the start policy; `end` is the
/// offset the next appended record will get.
#[must_use]
pub fn resolve_start(checkpoint: Option<Offset>, start: StartOffset, end: Offset) -> Offset {
    match (checkpoint, start) {
        (Some(committed), _) => committed.saturating_add(1),
        (None, StartOffset::Earliest) => 0,
        (None, StartOffset::Latest) => end,
        (None, StartOffset::Explicit(offset)) => offset,
    }
}

/// A partitioned log of records.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Returns the topic name.
    fn topic(&self) -> &str;

    /// Lists the partitions of the topic.
    async fn partitions(&self) -> Result<Vec<PartitionId>, SourceError>;

    /// Opens a consumer positioned after the partition's checkpoint, or at
    /// `start` if it has none.
    async fn open_partition(
        &self,
        partition: PartitionId,
        start: StartOffset,
    ) -> Result<Box<dyn PartitionConsumer>, SourceError>;
}

/// Reads one partition in offset order.
#[async_trait]
pub trait PartitionConsumer: Send + Sync {
    /// Returns the partition this consumer reads.
    fn partition(&self) -> PartitionId;

    /// Returns the offset of the next record to be returned.
    fn position(&self) -> Offset;

    /// Returns up to `max_records` records, waiting at most `timeout`.
    ///
    /// An empty batch means the timeout elapsed with nothing to read.
    async fn next_batch(
        &mut self,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<Record>, SourceError>;

    /// Durably records that every offset up to and including `offset` is done.
    async fn commit_offset(&mut self, offset: Offset) -> Result<(), CheckpointError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_wins_over_start_policy() {
        assert_eq!(resolve_start(Some(9), StartOffset::Latest, 100), 10);
        assert_eq!(resolve_start(Some(9), StartOffset::Explicit(3), 100), 10);
    }

    #[test]
    fn test_start_policy_without_checkpoint() {
        assert_eq!(resolve_start(None, StartOffset::Earliest, 100), 0);
        assert_eq!(resolve_start(None, StartOffset::Latest, 100), 100);
        assert_eq!(resolve_start(None, StartOffset::Explicit(42), 100), 42);
    }

    #[test]
    fn test_start_offset_from_toml() {
        #[derive(Deserialize)]
        struct Holder {
            start: StartOffset,
        }

        let latest: Holder = toml::from_str(r#"start = "latest""#).unwrap();
        assert_eq!(latest.start, StartOffset::Latest);

        let explicit: Holder = toml::from_str("start = { explicit = 12 }").unwrap();
        assert_eq!(explicit.start, StartOffset::Explicit(12));
    }
}
