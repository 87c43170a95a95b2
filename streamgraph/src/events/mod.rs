//! Pipeline events and alerts.
//!
//! Workers report what happened to every record and batch through an
//! [`EventSink`]. Events whose type is in [`ALERTS`] need operator attention.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A record's document was committed.
pub const RECORD_COMMITTED: &str = "record.committed";

/// A record failed transformation permanently and was skipped.
pub const RECORD_SKIPPED: &str = "record.skipped";

/// A record's commit failed permanently; the record was skipped.
pub const RECORD_FAILED: &str = "record.failed";

/// A partition's checkpoint advanced.
pub const BATCH_CHECKPOINTED: &str = "batch.checkpointed";

/// A partition worker stopped after exhausting its retries.
pub const PARTITION_HALTED: &str = "partition.halted";

/// Event types that are alerts.
pub const ALERTS: [&str; 2] = [RECORD_FAILED, PARTITION_HALTED];

/// Returns true if `event_type` is an alert.
#[must_use]
pub fn is_alert(event_type: &str) -> bool {
    ALERTS.contains(&event_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_classification() {
        assert!(is_alert(PARTITION_HALTED));
        assert!(is_alert(RECORD_FAILED));
        assert!(!is_alert(RECORD_SKIPPED));
        assert!(!is_alert(BATCH_CHECKPOINTED));
    }
}
