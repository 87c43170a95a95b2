//! Per-batch and per-partition outcome summaries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::errors::PartitionHalted;
use crate::model::{Offset, PartitionId};

/// Why a record ended without a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipKind {
    /// The payload could not be transformed.
    Skipped,
    /// The store rejected the document permanently.
    Failed,
}

/// A record that reached a terminal state without being committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipRecord {
    /// Source partition.
    pub partition: PartitionId,
    /// Source offset.
    pub offset: Offset,
    /// Skipped or failed.
    pub kind: SkipKind,
    /// Short error type name.
    pub error_type: String,
    /// Error message.
    pub error: String,
    /// When the record was given up on.
    pub at: DateTime<Utc>,
}

impl SkipRecord {
    /// Creates a skip record stamped with the current time.
    #[must_use]
    pub fn new(
        partition: PartitionId,
        offset: Offset,
        kind: SkipKind,
        error_type: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            partition,
            offset,
            kind,
            error_type: error_type.into(),
            error: error.into(),
            at: Utc::now(),
        }
    }

    /// Converts to the JSON payload of a skip or failure event.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "partition": self.partition,
            "offset": self.offset,
            "error_type": self.error_type,
            "error": self.error,
        })
    }
}

/// Outcome of one Fetching → Checkpointing cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Partition the batch came from.
    pub partition: PartitionId,
    /// Records fetched.
    pub fetched: usize,
    /// Records committed.
    pub committed: usize,
    /// Records skipped after a permanent transform error.
    pub skipped: usize,
    /// Records whose commit failed permanently.
    pub failed: usize,
    /// Details of every skipped or failed record.
    pub skips: Vec<SkipRecord>,
    /// Checkpoint written at the end of the cycle.
    pub checkpoint: Option<Offset>,
    /// True if shutdown stopped the cycle before the whole batch was handled.
    pub interrupted: bool,
    /// Wall time of the cycle.
    pub duration_ms: u64,
}

impl BatchSummary {
    /// Creates an empty summary for a fetched batch.
    #[must_use]
    pub fn new(partition: PartitionId, fetched: usize) -> Self {
        Self {
            partition,
            fetched,
            ..Self::default()
        }
    }

    /// Records a skipped or failed record.
    pub fn push_skip(&mut self, skip: SkipRecord) {
        match skip.kind {
            SkipKind::Skipped => self.skipped += 1,
            SkipKind::Failed => self.failed += 1,
        }
        self.skips.push(skip);
    }

    /// Records handled so far.
    #[must_use]
    pub fn terminal(&self) -> usize {
        self.committed + self.skipped + self.failed
    }
}

/// Final report of one partition worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartitionReport {
    /// The partition.
    pub partition: PartitionId,
    /// Cycles that processed at least one record.
    pub batches: usize,
    /// Records committed.
    pub committed: usize,
    /// Records skipped.
    pub skipped: usize,
    /// Records failed permanently.
    pub failed: usize,
    /// Every skipped or failed record.
    pub skips: Vec<SkipRecord>,
    /// Last checkpoint written by this worker.
    pub checkpoint: Option<Offset>,
    /// Set when the worker stopped on an unrecoverable error.
    pub halted: Option<PartitionHalted>,
}

impl PartitionReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new(partition: PartitionId) -> Self {
        Self {
            partition,
            ..Self::default()
        }
    }

    /// Folds a batch summary into the report.
    pub fn absorb(&mut self, batch: BatchSummary) {
        self.batches += 1;
        self.committed += batch.committed;
        self.skipped += batch.skipped;
        self.failed += batch.failed;
        self.skips.extend(batch.skips);
        if batch.checkpoint.is_some() {
            self.checkpoint = batch.checkpoint;
        }
    }

    /// Returns true if the worker halted.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }
}

/// Reports of every partition in a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    /// One report per partition, ordered by partition.
    pub partitions: Vec<PartitionReport>,
}

impl PipelineReport {
    /// Returns the report of one partition.
    #[must_use]
    pub fn partition(&self, partition: PartitionId) -> Option<&PartitionReport> {
        self.partitions.iter().find(|r| r.partition == partition)
    }

    /// Total committed records.
    #[must_use]
    pub fn committed(&self) -> usize {
        self.partitions.iter().map(|r| r.committed).sum()
    }

    /// Total skipped records.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.partitions.iter().map(|r| r.skipped).sum()
    }

    /// Total failed records.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.partitions.iter().map(|r| r.failed).sum()
    }

    /// Halts, one per halted partition.
    #[must_use]
    pub fn halted(&self) -> Vec<&PartitionHalted> {
        self.partitions.iter().filter_map(|r| r.halted.as_ref()).collect()
    }

    /// Returns true if any partition halted.
    #[must_use]
    pub fn has_halted(&self) -> bool {
        self.partitions.iter().any(PartitionReport::is_halted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_counts() {
        let mut batch = BatchSummary::new(0, 4);
        batch.committed = 2;
        batch.push_skip(SkipRecord::new(0, 1, SkipKind::Skipped, "DeserializationError", "bad json"));
        batch.push_skip(SkipRecord::new(0, 3, SkipKind::Failed, "CommitError", "schema"));

        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.terminal(), 4);
    }

    #[test]
    fn test_partition_report_absorbs_batches() {
        let mut report = PartitionReport::new(2);
        let mut first = BatchSummary::new(2, 3);
        first.committed = 3;
        first.checkpoint = Some(2);
        let mut second = BatchSummary::new(2, 1);
        second.push_skip(SkipRecord::new(2, 3, SkipKind::Skipped, "DeserializationError", "x"));
        second.checkpoint = Some(3);

        report.absorb(first);
        report.absorb(second);

        assert_eq!(report.batches, 2);
        assert_eq!(report.committed, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.checkpoint, Some(3));
        assert!(!report.is_halted());
    }

    #[test]
    fn test_pipeline_report_totals() {
        let mut ok = PartitionReport::new(0);
        ok.committed = 5;
        let mut halted = PartitionReport::new(1);
        halted.committed = 1;
        halted.halted = Some(PartitionHalted::new(1, "committing", Some(1), "store down"));

        let report = PipelineReport { partitions: vec![ok, halted] };
        assert_eq!(report.committed(), 6);
        assert!(report.has_halted());
        assert_eq!(report.halted().len(), 1);
        assert_eq!(report.partition(1).and_then(|r| r.halted.as_ref()).map(|h| h.partition), Some(1));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["partitions"][1]["halted"]["state"], "committing");
    }
}
