//! In-process partitioned log.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use super::{resolve_start, CheckpointStore, LogSource, MemoryCheckpointStore, PartitionConsumer, StartOffset, DEFAULT_GROUP};
use crate::errors::{CheckpointError, SourceError};
use crate::model::{Offset, PartitionId, Record};

/// A partitioned log held in memory.
///
/// Clones share the same partitions, so a test can keep appending to a log
/// that workers are already consuming. Consumers waiting on an empty partition
/// are woken as soon as a record is appended.
#[derive(Clone)]
pub struct MemoryLog {
    topic: String,
    group: String,
    partitions: Arc<RwLock<BTreeMap<PartitionId, Vec<Record>>>>,
    appended: Arc<Notify>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl MemoryLog {
    /// Creates a log with partitions `0..partitions` and in-memory checkpoints.
    #[must_use]
    pub fn new(topic: impl Into<String>, partitions: u32) -> Self {
        Self {
            topic: topic.into(),
            group: DEFAULT_GROUP.to_string(),
            partitions: Arc::new(RwLock::new((0..partitions).map(|p| (p, Vec::new())).collect())),
            appended: Arc::new(Notify::new()),
            checkpoints: Arc::new(MemoryCheckpointStore::new()),
        }
    }

    /// Sets the consumer group checkpoints are stored under.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Uses `checkpoints` instead of the private in-memory store.
    #[must_use]
    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    /// Appends a payload to a partition and returns its offset.
    pub fn append(&self, partition: PartitionId, payload: impl Into<Vec<u8>>) -> Result<Offset, SourceError> {
        self.push(partition, payload.into(), None)
    }

    /// Appends a payload carrying an explicit content type.
    pub fn append_with_content_type(
        &self,
        partition: PartitionId,
        payload: impl Into<Vec<u8>>,
        content_type: &str,
    ) -> Result<Offset, SourceError> {
        self.push(partition, payload.into(), Some(content_type))
    }

    fn push(&self, partition: PartitionId, payload: Vec<u8>, content_type: Option<&str>) -> Result<Offset, SourceError> {
        let offset = {
            let mut partitions = self.partitions.write();
            let records = partitions
                .get_mut(&partition)
                .ok_or_else(|| self.unknown(partition))?;
            let offset = records.len() as Offset;
            let mut record = Record::new(partition, offset, payload, Utc::now());
            if let Some(content_type) = content_type {
                record = record.with_content_type(content_type);
            }
            records.push(record);
            offset
        };
        self.appended.notify_waiters();
        Ok(offset)
    }

    /// Returns the number of records in a partition.
    #[must_use]
    pub fn len(&self, partition: PartitionId) -> usize {
        self.partitions.read().get(&partition).map_or(0, Vec::len)
    }

    /// Returns true if no partition holds a record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.read().values().all(Vec::is_empty)
    }

    fn unknown(&self, partition: PartitionId) -> SourceError {
        SourceError::UnknownPartition {
            topic: self.topic.clone(),
            partition,
        }
    }

    fn read(&self, partition: PartitionId, from: Offset, max_records: usize) -> Result<Vec<Record>, SourceError> {
        let partitions = self.partitions.read();
        let records = partitions.get(&partition).ok_or_else(|| self.unknown(partition))?;
        let from = usize::try_from(from).unwrap_or(usize::MAX);
        Ok(records.iter().skip(from).take(max_records).cloned().collect())
    }
}

impl std::fmt::Debug for MemoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLog")
            .field("topic", &self.topic)
            .field("group", &self.group)
            .field("partitions", &self.partitions.read().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LogSource for MemoryLog {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn partitions(&self) -> Result<Vec<PartitionId>, SourceError> {
        Ok(self.partitions.read().keys().copied().collect())
    }

    async fn open_partition(
        &self,
        partition: PartitionId,
        start: StartOffset,
    ) -> Result<Box<dyn PartitionConsumer>, SourceError> {
        let end = {
            let partitions = self.partitions.read();
            partitions.get(&partition).ok_or_else(|| self.unknown(partition))?.len() as Offset
        };
        let checkpoint = self.checkpoints.load(&self.group, &self.topic, partition).await?;
        let position = resolve_start(checkpoint, start, end);
        debug!(topic = %self.topic, partition, ?checkpoint, position, "Opened memory partition");

        Ok(Box::new(MemoryConsumer {
            log: self.clone(),
            partition,
            position,
        }))
    }
}

/// Consumer over one [`MemoryLog`] partition.
#[derive(Debug)]
pub struct MemoryConsumer {
    log: MemoryLog,
    partition: PartitionId,
    position: Offset,
}

#[async_trait]
impl PartitionConsumer for MemoryConsumer {
    fn partition(&self) -> PartitionId {
        self.partition
    }

    fn position(&self) -> Offset {
        self.position
    }

    async fn next_batch(&mut self, max_records: usize, timeout: Duration) -> Result<Vec<Record>, SourceError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register for wakeups before reading so an append between the
            // read and the wait is not missed.
            let notified = self.log.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.log.read(self.partition, self.position, max_records)?;
            if let Some(last) = batch.last() {
                self.position = last.offset() + 1;
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn commit_offset(&mut self, offset: Offset) -> Result<(), CheckpointError> {
        self.log
            .checkpoints
            .save(&self.log.group, &self.log.topic, self.partition, offset)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_batches_in_offset_order() {
        let log = MemoryLog::new("activities", 1);
        for i in 0..5 {
            log.append(0, format!("payload-{i}")).unwrap();
        }

        let mut consumer = log.open_partition(0, StartOffset::Earliest).await.unwrap();
        let first = consumer.next_batch(3, Duration::from_millis(10)).await.unwrap();
        let second = consumer.next_batch(3, Duration::from_millis(10)).await.unwrap();

        let offsets: Vec<Offset> = first.iter().chain(&second).map(Record::offset).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
        assert_eq!(second[1].payload(), b"payload-4");
        assert_eq!(consumer.position(), 5);
    }

    #[tokio::test]
    async fn test_empty_batch_on_timeout() {
        let log = MemoryLog::new("activities", 1);
        let mut consumer = log.open_partition(0, StartOffset::Earliest).await.unwrap();

        let batch = consumer.next_batch(10, Duration::from_millis(20)).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_waiting_consumer_wakes_on_append() {
        let log = MemoryLog::new("activities", 1);
        let mut consumer = log.open_partition(0, StartOffset::Earliest).await.unwrap();

        let writer = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.append(0, "late").unwrap();
        });

        let batch = consumer.next_batch(10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload(), b"late");
    }

    #[tokio::test]
    async fn test_resume_after_checkpoint() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let log = MemoryLog::new("activities", 2).with_checkpoints(checkpoints.clone());
        for i in 0..4 {
            log.append(1, format!("{i}")).unwrap();
        }

        let mut consumer = log.open_partition(1, StartOffset::Earliest).await.unwrap();
        consumer.commit_offset(1).await.unwrap();
        assert_eq!(checkpoints.load(DEFAULT_GROUP, "activities", 1).await.unwrap(), Some(1));

        let mut resumed = log.open_partition(1, StartOffset::Latest).await.unwrap();
        assert_eq!(resumed.position(), 2);
        let batch = resumed.next_batch(10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch.first().map(Record::offset), Some(2));
    }

    #[tokio::test]
    async fn test_latest_skips_existing_records() {
        let log = MemoryLog::new("activities", 1);
        log.append(0, "old").unwrap();

        let consumer = log.open_partition(0, StartOffset::Latest).await.unwrap();
        assert_eq!(consumer.position(), 1);
    }

    #[tokio::test]
    async fn test_unknown_partition() {
        let log = MemoryLog::new("activities", 1);
        assert!(matches!(
            log.open_partition(4, StartOffset::Earliest).await,
            Err(SourceError::UnknownPartition { partition: 4, .. })
        ));
        assert!(log.append(4, "x").is_err());
    }

    #[tokio::test]
    async fn test_content_type_is_carried() {
        let log = MemoryLog::new("activities", 1);
        log.append_with_content_type(0, "{}", "application/ld+json").unwrap();

        let mut consumer = log.open_partition(0, StartOffset::Earliest).await.unwrap();
        let batch = consumer.next_batch(1, Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch[0].content_type(), Some("application/ld+json"));
    }
}
