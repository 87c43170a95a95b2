//! Records read from the source log.

use chrono::{DateTime, Utc};

/// Identifier of a partition within a topic.
pub type PartitionId = u32;

/// Position of a record within its partition.
pub type Offset = u64;

/// Content type assumed when a record does not carry one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// A single message from the source log.
///
/// Records are immutable once read; the driver discards them after
/// transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    partition: PartitionId,
    offset: Offset,
    payload: Vec<u8>,
    timestamp: DateTime<Utc>,
    content_type: Option<String>,
}

impl Record {
    /// Creates a new record.
    #[must_use]
    pub fn new(
        partition: PartitionId,
        offset: Offset,
        payload: impl Into<Vec<u8>>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            partition,
            offset,
            payload: payload.into(),
            timestamp,
            content_type: None,
        }
    }

    /// Sets the content type tag.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Returns the partition the record was read from.
    #[must_use]
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Returns the record's offset.
    #[must_use]
    pub fn offset(&self) -> Offset {
        self.offset
    }

    /// Returns the raw payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the receive timestamp.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the explicit content type, if the source provided one.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}
