//! Error types for the ingestion pipeline.
//!
//! Errors are split by concern so the driver can classify each failure as
//! permanent (skip the record), transient (retry with backoff) or fatal for
//! the partition (halt and alert).

use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

use crate::model::{Offset, PartitionId};

/// The main error type for streamgraph operations.
#[derive(Debug, Error)]
pub enum StreamgraphError {
    /// The configuration could not be loaded or is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The source log failed.
    #[error("{0}")]
    Source(#[from] SourceError),

    /// A checkpoint could not be loaded or persisted.
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),

    /// A payload could not be transformed.
    #[error("{0}")]
    Transform(#[from] TransformError),

    /// A document could not be committed.
    #[error("{0}")]
    Commit(#[from] CommitError),

    /// The target store failed outside of a commit.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A partition worker halted.
    #[error("{0}")]
    Halted(#[from] PartitionHalted),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a payload codec.
///
/// Malformed input is reported distinctly from I/O failures: the former is
/// permanent for a given payload, the latter may succeed on a later attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The payload is not valid for the requested content type.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The codec could not read the payload.
    #[error("codec I/O error: {0}")]
    Io(String),
}

/// Error raised when a payload does not describe a valid event envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeserializationError {
    /// The payload could not be decoded at all.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// A required field is absent or empty.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// A field is present but has an unusable value.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl DeserializationError {
    /// Creates an invalid field error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while turning a record into a graph document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    /// The payload was malformed or failed envelope validation.
    #[error("{0}")]
    Deserialization(#[from] DeserializationError),

    /// The codec failed to read the payload.
    #[error("codec I/O error: {0}")]
    CodecIo(String),
}

impl TransformError {
    /// Returns true if the same record may transform successfully on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::CodecIo(_))
    }

    /// Short type name used in skip records and events.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Deserialization(_) => "DeserializationError",
            Self::CodecIo(_) => "CodecIoError",
        }
    }
}

impl From<CodecError> for TransformError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Malformed(reason) => {
                Self::Deserialization(DeserializationError::Malformed(reason))
            }
            CodecError::Io(reason) => Self::CodecIo(reason),
        }
    }
}

/// Errors reported by a graph store or one of its sessions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Another writer committed to the stream since this session read it.
    #[error("write conflict on stream '{stream}'")]
    Conflict {
        /// The contended stream.
        stream: String,
    },

    /// The written data violates the store's rules.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// The session was already committed, rolled back or closed.
    #[error("session {0} is no longer open")]
    SessionClosed(String),

    /// The store failed to persist its state.
    #[error("store I/O error: {0}")]
    Io(String),
}

impl StoreError {
    /// Returns true if retrying the same write may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Conflict { .. } | Self::Io(_))
    }
}

/// Error returned by the commit coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    /// The commit may succeed if retried (connection loss, lock contention).
    #[error("transient commit failure on stream '{stream}': {source}")]
    Transient {
        /// The target stream.
        stream: String,
        /// The store failure.
        source: StoreError,
    },

    /// The commit will never succeed for this document.
    #[error("permanent commit failure on stream '{stream}': {source}")]
    Permanent {
        /// The target stream.
        stream: String,
        /// The store failure.
        source: StoreError,
    },
}

impl CommitError {
    /// Classifies a store failure for the given stream.
    #[must_use]
    pub fn from_store(stream: impl Into<String>, source: StoreError) -> Self {
        let stream = stream.into();
        if source.is_transient() {
            Self::Transient { stream, source }
        } else {
            Self::Permanent { stream, source }
        }
    }

    /// Returns true for retryable failures.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns the stream the commit targeted.
    #[must_use]
    pub fn stream(&self) -> &str {
        match self {
            Self::Transient { stream, .. } | Self::Permanent { stream, .. } => stream,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        let kind = if self.is_transient() { "transient" } else { "permanent" };
        map.insert("type".to_string(), json!("CommitError"));
        map.insert("kind".to_string(), json!(kind));
        map.insert("stream".to_string(), json!(self.stream()));
        map.insert("message".to_string(), json!(self.to_string()));
        map
    }
}

/// Error raised when a checkpoint cannot be read or persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckpointError {
    /// Persisting a new checkpoint failed.
    #[error("failed to persist checkpoint for partition {partition} at offset {offset}: {reason}")]
    Persist {
        /// The partition being checkpointed.
        partition: PartitionId,
        /// The offset that could not be recorded.
        offset: Offset,
        /// Underlying failure.
        reason: String,
    },

    /// Reading existing checkpoints failed.
    #[error("failed to load checkpoints: {0}")]
    Load(String),
}

impl CheckpointError {
    /// Creates a persist error.
    #[must_use]
    pub fn persist(partition: PartitionId, offset: Offset, reason: impl Into<String>) -> Self {
        Self::Persist {
            partition,
            offset,
            reason: reason.into(),
        }
    }
}

/// Errors raised by the source log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The log cannot be reached right now.
    #[error("source log unavailable: {0}")]
    Unavailable(String),

    /// The requested partition does not exist.
    #[error("unknown partition {partition} on topic '{topic}'")]
    UnknownPartition {
        /// The topic name.
        topic: String,
        /// The missing partition.
        partition: PartitionId,
    },

    /// Reading the log failed.
    #[error("source I/O error: {0}")]
    Io(String),

    /// The partition's checkpoint could not be loaded.
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),
}

impl SourceError {
    /// Returns true if a later fetch may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io(_))
    }
}

/// Error raised when the configuration cannot be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config '{path}': {detail}")]
    Read {
        /// The config path.
        path: String,
        /// Underlying failure.
        detail: String,
    },

    /// The file is not valid TOML for the config schema.
    #[error("failed to parse config '{path}': {detail}")]
    Parse {
        /// The config path.
        path: String,
        /// Underlying failure.
        detail: String,
    },

    /// A value is out of range or inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Terminal failure of one partition worker.
///
/// Raised when retries are exhausted for a commit, a fetch or a checkpoint.
/// Only the affected partition stops; other workers keep running.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("partition {partition} halted while {state}{}: {reason}", .offset.map(|o| format!(" at offset {o}")).unwrap_or_default())]
pub struct PartitionHalted {
    /// The halted partition.
    pub partition: PartitionId,
    /// The cycle state the worker was in.
    pub state: String,
    /// The offset of the record being processed, if any.
    pub offset: Option<Offset>,
    /// Why the worker halted.
    pub reason: String,
}

impl PartitionHalted {
    /// Creates a new halt record.
    #[must_use]
    pub fn new(
        partition: PartitionId,
        state: impl Into<String>,
        offset: Option<Offset>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            partition,
            state: state.into(),
            offset,
            reason: reason.into(),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("partition".to_string(), json!(self.partition));
        map.insert("state".to_string(), json!(self.state));
        map.insert("offset".to_string(), json!(self.offset));
        map.insert("reason".to_string(), json!(self.reason));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_errors_map_to_transform_errors() {
        let malformed: TransformError = CodecError::Malformed("eof".into()).into();
        assert!(!malformed.is_transient());
        assert_eq!(malformed.error_type(), "DeserializationError");

        let io: TransformError = CodecError::Io("pipe closed".into()).into();
        assert!(io.is_transient());
    }

    #[test]
    fn test_commit_error_classification() {
        let conflict = CommitError::from_store("s", StoreError::Conflict { stream: "s".into() });
        assert!(conflict.is_transient());

        let schema = CommitError::from_store("s", StoreError::SchemaViolation("bad iri".into()));
        assert!(!schema.is_transient());
        assert_eq!(schema.stream(), "s");

        let dict = schema.to_dict();
        assert_eq!(dict.get("kind").unwrap(), "permanent");
    }

    #[test]
    fn test_session_closed_is_permanent() {
        assert!(!StoreError::SessionClosed("abc".into()).is_transient());
        assert!(StoreError::Unavailable("down".into()).is_transient());
    }

    #[test]
    fn test_partition_halted_message() {
        let halted = PartitionHalted::new(3, "committing", Some(42), "retries exhausted");
        let msg = halted.to_string();
        assert!(msg.contains("partition 3"));
        assert!(msg.contains("at offset 42"));

        let no_offset = PartitionHalted::new(1, "fetching", None, "gone");
        assert!(!no_offset.to_string().contains("offset"));
    }

    #[test]
    fn test_source_error_transience() {
        assert!(SourceError::Unavailable("x".into()).is_transient());
        assert!(!SourceError::UnknownPartition { topic: "t".into(), partition: 9 }.is_transient());
    }

    #[test]
    fn test_component_errors_convert_to_crate_error() {
        fn load() -> Result<(), StreamgraphError> {
            Err(ConfigError::Invalid("topic must not be empty".into()))?;
            Ok(())
        }

        let err = load().unwrap_err();
        assert!(matches!(err, StreamgraphError::Config(_)));
        assert!(err.to_string().contains("topic must not be empty"));

        let halted: StreamgraphError = PartitionHalted::new(0, "fetching", None, "gone").into();
        assert!(matches!(halted, StreamgraphError::Halted(_)));
    }
}
