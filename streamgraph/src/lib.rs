//! # Streamgraph
//!
//! At-least-once ingestion of partitioned event logs into named graphs.
//!
//! Records are pulled from a partitioned log, decoded into event envelopes,
//! mapped to graph documents and committed into a named stream of a
//! transactional graph store. A partition's checkpoint only advances after
//! every record up to it has been committed or permanently skipped, so a crash
//! at any point redelivers records instead of losing them:
//!
//! - **Source** (`source`): partitioned logs, per-partition consumers, checkpoints
//! - **Transformer** (`codec`, `transform`): payload → envelope → graph document
//! - **Commit coordinator** (`store`, `commit`): scoped, atomic sessions
//! - **Driver** (`pipeline`): one worker per partition, retries, poison isolation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use streamgraph::prelude::*;
//!
//! let log = MemoryLog::new("activities", 2);
//! log.append(0, r#"{"id": "urn:uuid:1", "type": "Create"}"#)?;
//!
//! let store = MemoryGraphStore::new();
//! let report = Pipeline::new(Arc::new(log), Arc::new(store.clone()))
//!     .with_settings(DriverSettings { exit_on_idle: true, ..DriverSettings::default() })
//!     .run()
//!     .await?;
//! assert_eq!(report.committed(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod codec;
pub mod commit;
pub mod config;
pub mod errors;
pub mod events;
pub mod model;
pub mod observability;
pub mod pipeline;
pub mod source;
pub mod store;
pub mod testing;
pub mod transform;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::ShutdownToken;
    pub use crate::codec::{Codec, JsonCodec};
    pub use crate::commit::CommitCoordinator;
    pub use crate::config::PipelineConfig;
    pub use crate::errors::{
        CheckpointError, CodecError, CommitError, DeserializationError, PartitionHalted,
        SourceError, StoreError, StreamgraphError, TransformError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::model::{EventEnvelope, GraphDocument, Offset, PartitionId, Record, Term, Triple};
    pub use crate::pipeline::{
        DriverSettings, PartitionReport, Pipeline, PipelineReport, RetryPolicy,
    };
    pub use crate::source::{
        CheckpointStore, FileCheckpointStore, FileLog, LogSource, MemoryCheckpointStore,
        MemoryLog, PartitionConsumer, StartOffset,
    };
    pub use crate::store::{GraphStore, MemoryGraphStore, Session};
    pub use crate::transform::Transformer;
}
