//! Runs one worker per partition.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info};

use super::driver::{DriverSettings, PartitionWorker, WorkerContext};
use super::report::{PartitionReport, PipelineReport};
use crate::cancellation::{ShutdownToken, WorkerGroup};
use crate::commit::CommitCoordinator;
use crate::errors::{PartitionHalted, SourceError};
use crate::events::{self, EventSink, LoggingEventSink};
use crate::model::PartitionId;
use crate::source::{LogSource, StartOffset};
use crate::store::GraphStore;
use crate::transform::Transformer;

/// The ingestion pipeline: a source, a transformer and a store, wired
/// together with one worker task per partition.
///
/// Partitions run in parallel; a partition that halts does not stop the
/// others. [`run`](Self::run) returns when every worker has stopped, either
/// after shutdown, after draining (with `exit_on_idle`) or by halting.
pub struct Pipeline {
    source: Arc<dyn LogSource>,
    transformer: Arc<Transformer>,
    coordinator: Arc<CommitCoordinator>,
    settings: DriverSettings,
    events: Arc<dyn EventSink>,
    shutdown: Arc<ShutdownToken>,
    start: StartOffset,
    partitions: Option<Vec<PartitionId>>,
    consumers: Option<usize>,
}

impl Pipeline {
    /// Creates a pipeline with default settings.
    #[must_use]
    pub fn new(source: Arc<dyn LogSource>, store: Arc<dyn GraphStore>) -> Self {
        Self {
            source,
            transformer: Arc::new(Transformer::default()),
            coordinator: Arc::new(CommitCoordinator::new(store)),
            settings: DriverSettings::default(),
            events: Arc::new(LoggingEventSink::default()),
            shutdown: Arc::new(ShutdownToken::new()),
            start: StartOffset::Earliest,
            partitions: None,
            consumers: None,
        }
    }

    /// Sets the transformer.
    #[must_use]
    pub fn with_transformer(mut self, transformer: Transformer) -> Self {
        self.transformer = Arc::new(transformer);
        self
    }

    /// Sets the worker settings.
    #[must_use]
    pub fn with_settings(mut self, settings: DriverSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Shares an existing shutdown token.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Arc<ShutdownToken>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Sets the start policy for partitions without a checkpoint.
    #[must_use]
    pub fn with_start(mut self, start: StartOffset) -> Self {
        self.start = start;
        self
    }

    /// Restricts the run to some partitions.
    #[must_use]
    pub fn with_partitions(mut self, partitions: Vec<PartitionId>) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Bounds how many partitions may run a batch cycle at the same time.
    #[must_use]
    pub fn with_consumers(mut self, consumers: usize) -> Self {
        self.consumers = Some(consumers.max(1));
        self
    }

    /// Returns the shutdown token; cancelling it stops every worker.
    #[must_use]
    pub fn shutdown_token(&self) -> Arc<ShutdownToken> {
        self.shutdown.clone()
    }

    /// Returns the commit coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<CommitCoordinator> {
        &self.coordinator
    }

    /// Opens every partition and runs the workers until they stop.
    ///
    /// Fails only if the partitions cannot be listed or opened; problems
    /// after that are reported per partition.
    pub async fn run(&self) -> Result<PipelineReport, SourceError> {
        let mut partitions = match &self.partitions {
            Some(partitions) => partitions.clone(),
            None => self.source.partitions().await?,
        };
        partitions.sort_unstable();
        partitions.dedup();

        let mut consumers = Vec::with_capacity(partitions.len());
        for partition in &partitions {
            consumers.push(self.source.open_partition(*partition, self.start).await?);
        }

        let ctx = WorkerContext {
            transformer: self.transformer.clone(),
            coordinator: self.coordinator.clone(),
            settings: Arc::new(self.settings.clone()),
            events: self.events.clone(),
            shutdown: self.shutdown.clone(),
            limiter: self.consumers.map(|n| Arc::new(Semaphore::new(n))),
        };

        info!(
            topic = self.source.topic(),
            partitions = ?partitions,
            stream = %self.settings.stream,
            "Starting pipeline"
        );

        let group = WorkerGroup::default();
        for consumer in consumers {
            let worker = PartitionWorker::new(consumer, ctx.clone());
            group.spawn(format!("partition-{}", worker.partition()), worker.run());
        }

        let mut reports = Vec::with_capacity(partitions.len());
        for (partition, (name, outcome)) in partitions.iter().zip(group.wait().await) {
            match outcome {
                Ok(report) => reports.push(report),
                Err(reason) => {
                    let halted = PartitionHalted::new(*partition, "running", None, reason);
                    error!(task = %name, partition, "Partition worker crashed");
                    self.events
                        .emit(events::PARTITION_HALTED, Some(serde_json::json!(halted.to_dict())))
                        .await;
                    let mut report = PartitionReport::new(*partition);
                    report.halted = Some(halted);
                    reports.push(report);
                }
            }
        }

        let report = PipelineReport { partitions: reports };
        info!(
            committed = report.committed(),
            skipped = report.skipped(),
            failed = report.failed(),
            halted = report.halted().len(),
            "Pipeline stopped"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("topic", &self.source.topic())
            .field("settings", &self.settings)
            .field("start", &self.start)
            .field("consumers", &self.consumers)
            .finish_non_exhaustive()
    }
}
