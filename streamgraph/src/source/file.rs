//! Directory-backed log: `<root>/<topic>/<partition>.log`, one payload per line.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, trace};

use super::{resolve_start, CheckpointStore, LogSource, MemoryCheckpointStore, PartitionConsumer, StartOffset, DEFAULT_GROUP};
use crate::errors::{CheckpointError, SourceError};
use crate::model::{Offset, PartitionId, Record};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A log whose partitions are append-only text files.
///
/// The offset of a record is the zero-based index of its line. A line is only
/// read once its terminating newline has been written, so a writer appending
/// concurrently never yields half a payload. Blank lines occupy an offset but
/// produce no record.
#[derive(Clone)]
pub struct FileLog {
    root: PathBuf,
    topic: String,
    group: String,
    checkpoints: Arc<dyn CheckpointStore>,
    poll_interval: Duration,
}

impl FileLog {
    /// Creates a log reading `<root>/<topic>/`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, topic: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            topic: topic.into(),
            group: DEFAULT_GROUP.to_string(),
            checkpoints: Arc::new(MemoryCheckpointStore::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the consumer group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Sets the checkpoint store.
    #[must_use]
    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    /// Sets how often an idle partition file is re-read.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn topic_dir(&self) -> PathBuf {
        self.root.join(&self.topic)
    }

    /// Opens a consumer over one partition file.
    pub async fn open_consumer(
        &self,
        partition: PartitionId,
        start: StartOffset,
    ) -> Result<FileConsumer, SourceError> {
        let path = self.partition_path(partition);
        if !tokio::fs::try_exists(&path).await.map_err(|e| io_error(&path, &e))? {
            return Err(SourceError::UnknownPartition {
                topic: self.topic.clone(),
                partition,
            });
        }

        let mut consumer = FileConsumer {
            log: self.clone(),
            partition,
            path,
            position: 0,
            cursor: 0,
            line: 0,
            reader: None,
        };

        let checkpoint = self.checkpoints.load(&self.group, &self.topic, partition).await?;
        let end = if checkpoint.is_none() && start == StartOffset::Latest {
            consumer.count_lines().await?
        } else {
            0
        };
        consumer.position = resolve_start(checkpoint, start, end);
        debug!(topic = %self.topic, partition, ?checkpoint, position = consumer.position, "Opened file partition");

        Ok(consumer)
    }

    /// Returns the file backing a partition.
    #[must_use]
    pub fn partition_path(&self, partition: PartitionId) -> PathBuf {
        self.topic_dir().join(format!("{partition}.log"))
    }
}

impl std::fmt::Debug for FileLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLog")
            .field("root", &self.root)
            .field("topic", &self.topic)
            .field("group", &self.group)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

fn io_error(path: &Path, err: &std::io::Error) -> SourceError {
    SourceError::Io(format!("'{}': {err}", path.display()))
}

#[async_trait]
impl LogSource for FileLog {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn partitions(&self) -> Result<Vec<PartitionId>, SourceError> {
        let dir = self.topic_dir();
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SourceError::Unavailable(format!("topic directory '{}' does not exist", dir.display()))
            } else {
                io_error(&dir, &e)
            }
        })?;

        let mut partitions = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, &e))? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("log") {
                continue;
            }
            if let Some(partition) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<PartitionId>().ok())
            {
                partitions.push(partition);
            }
        }
        partitions.sort_unstable();
        Ok(partitions)
    }

    async fn open_partition(
        &self,
        partition: PartitionId,
        start: StartOffset,
    ) -> Result<Box<dyn PartitionConsumer>, SourceError> {
        Ok(Box::new(self.open_consumer(partition, start).await?))
    }
}

/// Consumer over one partition file of a [`FileLog`].
#[derive(Debug)]
pub struct FileConsumer {
    log: FileLog,
    partition: PartitionId,
    path: PathBuf,
    /// Next offset to hand out.
    position: Offset,
    /// Byte offset of the first unread line.
    cursor: u64,
    /// Line index at `cursor`.
    line: Offset,
    /// Open reader positioned at `cursor`, if any.
    reader: Option<BufReader<File>>,
}

impl FileConsumer {
    async fn open_at_cursor(&self) -> Result<BufReader<File>, SourceError> {
        let mut file = File::open(&self.path)
            .await
            .map_err(|e| io_error(&self.path, &e))?;
        file.seek(std::io::SeekFrom::Start(self.cursor))
            .await
            .map_err(|e| io_error(&self.path, &e))?;
        Ok(BufReader::new(file))
    }

    async fn count_lines(&self) -> Result<Offset, SourceError> {
        let mut reader = self.open_at_cursor().await?;
        let mut count: Offset = 0;
        loop {
            let chunk = reader.fill_buf().await.map_err(|e| io_error(&self.path, &e))?;
            if chunk.is_empty() {
                return Ok(count);
            }
            count += chunk.iter().filter(|b| **b == b'\n').count() as Offset;
            let len = chunk.len();
            reader.consume(len);
        }
    }

    /// Reads complete lines past the cursor, advancing it over every line
    /// consumed or skipped. Stops after `max_records` records.
    async fn poll(&mut self, max_records: usize) -> Result<Vec<Record>, SourceError> {
        let mut reader = match self.reader.take() {
            Some(reader) => reader,
            None => self.open_at_cursor().await?,
        };
        let mut records = Vec::new();
        let mut raw = Vec::new();

        while records.len() < max_records {
            raw.clear();
            let read = reader
                .read_until(b'\n', &mut raw)
                .await
                .map_err(|e| io_error(&self.path, &e))?;
            if read == 0 {
                break;
            }
            if raw.last() != Some(&b'\n') {
                // Partial line; reopen at the cursor once the writer finishes it.
                return Ok(records);
            }
            self.cursor += read as u64;
            let offset = self.line;
            self.line += 1;

            if offset < self.position {
                continue;
            }
            self.position = offset + 1;

            let payload = &raw[..raw.len() - 1];
            let payload = payload.strip_suffix(b"\r").unwrap_or(payload);
            if payload.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            records.push(Record::new(self.partition, offset, payload.to_vec(), Utc::now()));
        }

        self.reader = Some(reader);
        Ok(records)
    }
}

#[async_trait]
impl PartitionConsumer for FileConsumer {
    fn partition(&self) -> PartitionId {
        self.partition
    }

    fn position(&self) -> Offset {
        self.position
    }

    async fn next_batch(&mut self, max_records: usize, timeout: Duration) -> Result<Vec<Record>, SourceError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let records = self.poll(max_records).await?;
            if !records.is_empty() {
                trace!(partition = self.partition, count = records.len(), "Read file batch");
                return Ok(records);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(self.log.poll_interval.min(deadline - now)).await;
        }
    }

    async fn commit_offset(&mut self, offset: Offset) -> Result<(), CheckpointError> {
        self.log
            .checkpoints
            .save(&self.log.group, &self.log.topic, self.partition, offset)
            .await
    }
}
