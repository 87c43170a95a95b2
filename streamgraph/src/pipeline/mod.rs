//! The pipeline driver.
//!
//! This module provides:
//! - The per-partition worker state machine
//! - Retry with backoff for transient failures
//! - Batch and partition reports
//! - The supervisor running one worker per partition

mod driver;
mod report;
mod retry;
mod supervisor;


pub use driver::{CycleState, DriverSettings, PartitionWorker, WorkerContext, DEFAULT_STREAM};
pub use report::{BatchSummary, PartitionReport, PipelineReport, SkipKind, SkipRecord};
pub use retry::{
    should_retry, with_retry, BackoffStrategy, JitterStrategy, RetryDecision, RetryError,
    RetryPolicy, RetryState,
};
pub use supervisor::Pipeline;
