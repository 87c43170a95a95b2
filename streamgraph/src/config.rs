//! Pipeline configuration loaded from TOML.
//!
//! ```toml
//! [source]
//! broker = "./data/log"      # root directory of the file-backed log
//! topic = "activities"
//! group = "streamgraph"
//! max_records = 100
//! poll_timeout_ms = 500
//! start = "earliest"         # "latest" or { explicit = 42 }
//! consumers = 4
//!
//! [store]
//! stream = "http://trellisldp.org/activitystream"
//! snapshot = "./data/graph.json"
//!
//! [checkpoint]
//! path = "./data/checkpoints.json"
//!
//! [retry]
//! max_retries = 5
//! backoff = "exponential"
//!
//! [log]
//! level = "info"
//! format = "json"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::{Codec, JsonCodec};
use crate::errors::ConfigError;
use crate::model::{is_absolute_iri, PartitionId, DEFAULT_CONTENT_TYPE};
use crate::pipeline::{DriverSettings, RetryPolicy, DEFAULT_STREAM};
use crate::source::{StartOffset, DEFAULT_GROUP};
use crate::transform::vocab::ACTIVITY_STREAMS;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Source log settings.
    pub source: SourceConfig,
    /// Transformation settings.
    pub transform: TransformConfig,
    /// Target store settings.
    pub store: StoreConfig,
    /// Checkpoint persistence.
    pub checkpoint: CheckpointConfig,
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
    /// Logging.
    pub log: LogConfig,
}

/// `[source]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// Log location; the root directory for the file-backed log.
    pub broker: PathBuf,
    /// Topic to consume.
    pub topic: String,
    /// Consumer group checkpoints are kept under.
    pub group: String,
    /// Maximum records per fetch.
    pub max_records: usize,
    /// How long a fetch waits for records.
    pub poll_timeout_ms: u64,
    /// How often an idle partition file is re-read.
    pub poll_interval_ms: u64,
    /// Where partitions without a checkpoint start.
    pub start: StartOffset,
    /// How many partitions may run a batch cycle at once. Unbounded if unset.
    pub consumers: Option<usize>,
    /// Partitions to consume. All of them if unset.
    pub partitions: Option<Vec<PartitionId>>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            broker: PathBuf::from("./data/log"),
            topic: "activities".to_string(),
            group: DEFAULT_GROUP.to_string(),
            max_records: 100,
            poll_timeout_ms: 500,
            poll_interval_ms: 50,
            start: StartOffset::Earliest,
            consumers: None,
            partitions: None,
        }
    }
}

/// `[transform]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    /// Namespace for type names and keys that are not absolute IRIs.
    pub vocabulary: String,
    /// Content type assumed for records without one.
    pub content_type: String,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            vocabulary: ACTIVITY_STREAMS.to_string(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }
}

/// `[store]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Named stream documents are committed into.
    pub stream: String,
    /// Snapshot file; the store is memory-only if unset.
    pub snapshot: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            stream: DEFAULT_STREAM.to_string(),
            snapshot: None,
        }
    }
}

/// `[checkpoint]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointConfig {
    /// Checkpoint file; checkpoints are memory-only if unset.
    pub path: Option<PathBuf>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Multi-line, human readable.
    #[default]
    Pretty,
    /// Single-line, human readable.
    Compact,
    /// One JSON object per line.
    Json,
}

/// `[log]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl PipelineConfig {
    /// Reads, parses and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: display.clone(),
            detail: e.to_string(),
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: display,
            detail: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.source.topic.trim().is_empty() {
            return invalid("source.topic must not be empty".into());
        }
        if self.source.group.trim().is_empty() {
            return invalid("source.group must not be empty".into());
        }
        if self.source.max_records == 0 {
            return invalid("source.max_records must be at least 1".into());
        }
        if self.source.poll_timeout_ms == 0 {
            return invalid("source.poll_timeout_ms must be at least 1".into());
        }
        if self.source.consumers == Some(0) {
            return invalid("source.consumers must be at least 1".into());
        }
        if self.source.partitions.as_ref().is_some_and(Vec::is_empty) {
            return invalid("source.partitions must not be an empty list".into());
        }
        if !is_absolute_iri(&self.store.stream) {
            return invalid(format!("store.stream '{}' is not an absolute IRI", self.store.stream));
        }
        if !is_absolute_iri(&self.transform.vocabulary) {
            return invalid(format!(
                "transform.vocabulary '{}' is not an absolute IRI",
                self.transform.vocabulary
            ));
        }
        if !JsonCodec::new().supports(&self.transform.content_type) {
            return invalid(format!(
                "transform.content_type '{}' is not supported",
                self.transform.content_type
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return invalid(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            ));
        }
        Ok(())
    }

    /// Builds the worker settings.
    #[must_use]
    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            stream: self.store.stream.clone(),
            max_records: self.source.max_records,
            poll_timeout: Duration::from_millis(self.source.poll_timeout_ms),
            retry: self.retry.clone(),
            exit_on_idle: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::BackoffStrategy;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_full_config() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [source]
            broker = "/var/lib/streamgraph/log"
            topic = "trellis"
            max_records = 10
            start = { explicit = 7 }
            consumers = 2
            partitions = [0, 3]

            [store]
            stream = "http://example.org/graph"
            snapshot = "/var/lib/streamgraph/graph.json"

            [checkpoint]
            path = "/var/lib/streamgraph/checkpoints.json"

            [retry]
            max_retries = 3
            backoff = "constant"

            [log]
            format = "json"
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.source.start, StartOffset::Explicit(7));
        assert_eq!(config.source.partitions, Some(vec![0, 3]));
        assert_eq!(config.retry.backoff, BackoffStrategy::Constant);
        assert_eq!(config.log.format, LogFormat::Json);

        let settings = config.driver_settings();
        assert_eq!(settings.stream, "http://example.org/graph");
        assert_eq!(settings.max_records, 10);
        assert_eq!(settings.retry.max_retries, 3);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(toml::from_str::<PipelineConfig>("[source]\ntopik = \"x\"").is_err());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = PipelineConfig::default();
        config.store.stream = "activitystream".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = PipelineConfig::default();
        config.source.consumers = Some(0);
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.transform.content_type = "text/turtle".to_string();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.retry.base_delay_ms = 50_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(PipelineConfig::load(&missing), Err(ConfigError::Read { .. })));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[source\n").unwrap();
        let err = PipelineConfig::load(&broken).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path.ends_with("broken.toml")));
    }
}
