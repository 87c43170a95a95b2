//! Partition worker state machine.
//!
//! A worker owns one partition and loops through
//! `Fetching → Transforming → Committing → Checkpointing → Fetching`.
//! Records are handled strictly in offset order. The checkpoint only moves
//! once every record of the batch is terminal (committed, skipped or failed),
//! so a crash between commit and checkpoint redelivers, never loses.

use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::report::{BatchSummary, PartitionReport, SkipKind, SkipRecord};
use super::retry::{should_retry, with_retry, RetryDecision, RetryError, RetryPolicy, RetryState};
use crate::cancellation::ShutdownToken;
use crate::commit::CommitCoordinator;
use crate::errors::{CommitError, PartitionHalted, TransformError};
use crate::events::{self, EventSink};
use crate::model::{GraphDocument, Offset, PartitionId, Record};
use crate::observability::SpanTimer;
use crate::source::PartitionConsumer;
use crate::transform::Transformer;

/// Named stream activity documents are committed into by default.
pub const DEFAULT_STREAM: &str = "http://trellisldp.org/activitystream";

/// Where a worker is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    /// Waiting for the next batch.
    Fetching,
    /// Turning a record into a document.
    Transforming,
    /// Writing a document to the store.
    Committing,
    /// Persisting the partition checkpoint.
    Checkpointing,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetching => "fetching",
            Self::Transforming => "transforming",
            Self::Committing => "committing",
            Self::Checkpointing => "checkpointing",
        };
        f.write_str(name)
    }
}

/// Settings shared by every partition worker.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Target named stream.
    pub stream: String,
    /// Maximum records per fetch.
    pub max_records: usize,
    /// How long one fetch may wait for records.
    pub poll_timeout: Duration,
    /// Retry policy for every transient failure.
    pub retry: RetryPolicy,
    /// Stop the worker after the first empty fetch instead of polling forever.
    pub exit_on_idle: bool,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            stream: DEFAULT_STREAM.to_string(),
            max_records: 100,
            poll_timeout: Duration::from_millis(500),
            retry: RetryPolicy::default(),
            exit_on_idle: false,
        }
    }
}

/// Shared collaborators of the partition workers.
#[derive(Clone)]
pub struct WorkerContext {
    /// Payload transformer.
    pub transformer: Arc<Transformer>,
    /// Commit coordinator.
    pub coordinator: Arc<CommitCoordinator>,
    /// Worker settings.
    pub settings: Arc<DriverSettings>,
    /// Event and alert sink.
    pub events: Arc<dyn EventSink>,
    /// Shutdown signal.
    pub shutdown: Arc<ShutdownToken>,
    /// Bounds how many workers run a batch cycle at once.
    pub limiter: Option<Arc<Semaphore>>,
}

/// Drives one partition until shutdown, idle exit or halt.
pub struct PartitionWorker {
    consumer: Box<dyn PartitionConsumer>,
    ctx: WorkerContext,
    state: CycleState,
    checkpoint: Option<Offset>,
}

/// Outcome of one record.
enum Disposition {
    Committed,
    Skipped(SkipRecord),
}

impl PartitionWorker {
    /// Creates a worker over an opened consumer.
    #[must_use]
    pub fn new(consumer: Box<dyn PartitionConsumer>, ctx: WorkerContext) -> Self {
        Self {
            consumer,
            ctx,
            state: CycleState::Fetching,
            checkpoint: None,
        }
    }

    /// Returns the partition this worker drives.
    #[must_use]
    pub fn partition(&self) -> PartitionId {
        self.consumer.partition()
    }

    /// Runs the worker to completion.
    pub async fn run(mut self) -> PartitionReport {
        let partition = self.partition();
        let span = info_span!("partition", partition);
        async move {
            let mut report = PartitionReport::new(partition);
            info!(position = self.consumer.position(), "Partition worker started");

            if let Err(halted) = self.run_cycles(&mut report).await {
                error!(
                    state = %halted.state,
                    offset = ?halted.offset,
                    reason = %halted.reason,
                    "Partition halted"
                );
                self.ctx
                    .events
                    .emit(events::PARTITION_HALTED, Some(json!(halted.to_dict())))
                    .await;
                report.halted = Some(halted);
            }

            info!(
                committed = report.committed,
                skipped = report.skipped,
                failed = report.failed,
                checkpoint = ?report.checkpoint,
                "Partition worker stopped"
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn run_cycles(&mut self, report: &mut PartitionReport) -> Result<(), PartitionHalted> {
        let shutdown = self.ctx.shutdown.clone();

        loop {
            if shutdown.is_cancelled() {
                debug!("Shutdown requested, not fetching");
                return Ok(());
            }

            self.state = CycleState::Fetching;
            let batch = tokio::select! {
                biased;
                () = shutdown.cancelled() => return Ok(()),
                fetched = self.fetch() => fetched?,
            };

            if batch.is_empty() {
                if self.ctx.settings.exit_on_idle {
                    debug!("Partition drained");
                    return Ok(());
                }
                continue;
            }

            let _permit = match &self.ctx.limiter {
                Some(limiter) => limiter.clone().acquire_owned().await.ok(),
                None => None,
            };
            self.process_batch(batch, report).await?;
        }
    }

    async fn fetch(&mut self) -> Result<Vec<Record>, PartitionHalted> {
        let settings = self.ctx.settings.clone();
        let mut retry = RetryState::new();

        loop {
            match self
                .consumer
                .next_batch(settings.max_records, settings.poll_timeout)
                .await
            {
                Ok(batch) => return Ok(batch),
                Err(e) if e.is_transient() => match should_retry(&mut retry, &settings.retry, "fetch") {
                    RetryDecision::Retry(delay) => {
                        warn!(attempt = retry.retries, error = %e, "Fetch failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::GiveUp => {
                        return Err(self.halt(None, format!("fetch failed after {} attempts: {e}", retry.attempts())));
                    }
                },
                Err(e) => return Err(self.halt(None, format!("fetch failed: {e}"))),
            }
        }
    }

    /// Handles every record of a batch, then checkpoints the terminal prefix.
    ///
    /// The batch summary is folded into `report` even when the worker halts
    /// part-way, so records already committed or skipped stay accounted for.
    async fn process_batch(
        &mut self,
        batch: Vec<Record>,
        report: &mut PartitionReport,
    ) -> Result<(), PartitionHalted> {
        let partition = self.partition();
        let timer = SpanTimer::start(format!("batch-{partition}"));
        let mut summary = BatchSummary::new(partition, batch.len());

        let mut outcome = self.process_records(&batch, &mut summary).await;
        if outcome.is_ok() {
            outcome = self.checkpoint_terminal(&mut summary).await;
        }

        summary.duration_ms = timer.finish();
        debug!(
            fetched = summary.fetched,
            committed = summary.committed,
            skipped = summary.skipped,
            failed = summary.failed,
            duration_ms = summary.duration_ms,
            halted = outcome.is_err(),
            "Batch complete"
        );
        report.absorb(summary);
        outcome
    }

    async fn process_records(
        &mut self,
        batch: &[Record],
        summary: &mut BatchSummary,
    ) -> Result<(), PartitionHalted> {
        for record in batch {
            if self.ctx.shutdown.is_cancelled() {
                info!(offset = record.offset(), "Shutdown requested, leaving rest of batch");
                summary.interrupted = true;
                break;
            }

            match self.process_record(record).await? {
                Disposition::Committed => summary.committed += 1,
                Disposition::Skipped(skip) => summary.push_skip(skip),
            }
        }
        Ok(())
    }

    async fn checkpoint_terminal(&mut self, summary: &mut BatchSummary) -> Result<(), PartitionHalted> {
        let Some(offset) = self.ctx.coordinator.terminal_offset(self.partition()) else {
            return Ok(());
        };
        if self.checkpoint.map_or(true, |current| offset > current) {
            self.state = CycleState::Checkpointing;
            self.checkpoint_offset(offset).await?;
            summary.checkpoint = Some(offset);
        }
        Ok(())
    }

    async fn process_record(&mut self, record: &Record) -> Result<Disposition, PartitionHalted> {
        let partition = record.partition();
        let offset = record.offset();

        self.state = CycleState::Transforming;
        let document = match self.transform(record).await {
            Ok(document) => document,
            Err(RetryError::Permanent(e)) => {
                let skip = SkipRecord::new(partition, offset, SkipKind::Skipped, e.error_type(), e.to_string());
                warn!(offset, error_type = e.error_type(), error = %e, "Skipping record");
                self.ctx.events.emit(events::RECORD_SKIPPED, Some(skip.to_value())).await;
                self.ctx.coordinator.mark_terminal(partition, offset);
                return Ok(Disposition::Skipped(skip));
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                return Err(self.halt(Some(offset), format!("transform failed after {attempts} attempts: {last}")));
            }
        };

        self.state = CycleState::Committing;
        match self.commit(partition, offset, &document).await {
            Ok(()) => {
                debug!(offset, stream = %self.ctx.settings.stream, triples = document.len(), "Record committed");
                self.ctx
                    .events
                    .emit(
                        events::RECORD_COMMITTED,
                        Some(json!({
                            "partition": partition,
                            "offset": offset,
                            "subject": document.subject(),
                            "triples": document.len(),
                        })),
                    )
                    .await;
                Ok(Disposition::Committed)
            }
            Err(RetryError::Permanent(e)) => {
                let skip = SkipRecord::new(partition, offset, SkipKind::Failed, "CommitError", e.to_string());
                error!(offset, stream = %e.stream(), error = %e, "Commit failed permanently, skipping record");
                let mut data = skip.to_value();
                data["stream"] = json!(e.stream());
                self.ctx.events.emit(events::RECORD_FAILED, Some(data)).await;
                self.ctx.coordinator.mark_terminal(partition, offset);
                Ok(Disposition::Skipped(skip))
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                Err(self.halt(Some(offset), format!("commit failed after {attempts} attempts: {last}")))
            }
        }
    }

    async fn transform(&self, record: &Record) -> Result<GraphDocument, RetryError<TransformError>> {
        let transformer = &self.ctx.transformer;
        let key = format!("transform-{}", record.partition());
        with_retry(
            &self.ctx.settings.retry,
            &key,
            move || async move { transformer.transform(record) },
            TransformError::is_transient,
        )
        .await
    }

    async fn commit(
        &self,
        partition: PartitionId,
        offset: Offset,
        document: &GraphDocument,
    ) -> Result<(), RetryError<CommitError>> {
        let coordinator = &self.ctx.coordinator;
        let stream = self.ctx.settings.stream.as_str();
        let key = format!("commit-{partition}");
        with_retry(
            &self.ctx.settings.retry,
            &key,
            move || async move { coordinator.commit_record(stream, partition, offset, document).await },
            CommitError::is_transient,
        )
        .await
    }

    async fn checkpoint_offset(&mut self, offset: Offset) -> Result<(), PartitionHalted> {
        let policy = self.ctx.settings.retry.clone();
        let mut retry = RetryState::new();

        loop {
            match self.consumer.commit_offset(offset).await {
                Ok(()) => break,
                Err(e) => match should_retry(&mut retry, &policy, "checkpoint") {
                    RetryDecision::Retry(delay) => {
                        warn!(offset, attempt = retry.retries, error = %e, "Checkpoint failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::GiveUp => {
                        return Err(self.halt(
                            Some(offset),
                            format!("checkpoint failed after {} attempts: {e}", retry.attempts()),
                        ));
                    }
                },
            }
        }

        self.checkpoint = Some(offset);
        debug!(offset, "Checkpoint advanced");
        self.ctx
            .events
            .emit(
                events::BATCH_CHECKPOINTED,
                Some(json!({"partition": self.partition(), "offset": offset})),
            )
            .await;
        Ok(())
    }

    fn halt(&self, offset: Option<Offset>, reason: String) -> PartitionHalted {
        PartitionHalted::new(self.partition(), self.state.to_string(), offset, reason)
    }
}

impl fmt::Debug for PartitionWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionWorker")
            .field("partition", &self.partition())
            .field("state", &self.state)
            .field("checkpoint", &self.checkpoint)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("settings", &self.settings)
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}
