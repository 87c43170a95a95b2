//! Fault-injecting wrappers around the store and the checkpoint store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::errors::{CheckpointError, StoreError};
use crate::model::{GraphDocument, Offset, PartitionId};
use crate::source::CheckpointStore;
use crate::store::{GraphStore, Session};

#[derive(Debug)]
struct FlakyState {
    available: AtomicBool,
    commit_failures: Mutex<VecDeque<StoreError>>,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

/// A [`GraphStore`] that fails on demand.
///
/// Queued failures are returned by the next commits, in order, without
/// reaching the wrapped store. Clones share the same failure queue and
/// counters.
#[derive(Clone)]
pub struct FlakyStore {
    inner: Arc<dyn GraphStore>,
    state: Arc<FlakyState>,
}

impl FlakyStore {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn GraphStore>) -> Self {
        Self {
            inner,
            state: Arc::new(FlakyState {
                available: AtomicBool::new(true),
                commit_failures: Mutex::new(VecDeque::new()),
                commits: AtomicUsize::new(0),
                rollbacks: AtomicUsize::new(0),
            }),
        }
    }

    /// Makes the next `count` commits fail with `error`.
    pub fn fail_next_commits(&self, count: usize, error: StoreError) {
        let mut failures = self.state.commit_failures.lock();
        failures.extend(std::iter::repeat(error).take(count));
    }

    /// Makes `open` fail with [`StoreError::Unavailable`] while false.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Commit attempts seen, failed ones included.
    #[must_use]
    pub fn commit_attempts(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }

    /// Rollbacks seen.
    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.state.rollbacks.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for FlakyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyStore").field("state", &self.state).finish_non_exhaustive()
    }
}

#[async_trait]
impl GraphStore for FlakyStore {
    async fn open(&self) -> Result<Box<dyn Session>, StoreError> {
        if !self.state.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        let inner = self.inner.open().await?;
        Ok(Box::new(FlakySession {
            inner,
            state: self.state.clone(),
        }))
    }
}

struct FlakySession {
    inner: Box<dyn Session>,
    state: Arc<FlakyState>,
}

#[async_trait]
impl Session for FlakySession {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn write_named(&mut self, stream: &str, document: &GraphDocument) -> Result<(), StoreError> {
        self.inner.write_named(stream, document).await
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        let injected = self.state.commit_failures.lock().pop_front();
        match injected {
            Some(error) => Err(error),
            None => self.inner.commit().await,
        }
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback().await
    }

    async fn close(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.close().await
    }
}

/// A [`CheckpointStore`] whose saves fail on demand.
#[derive(Clone)]
pub struct FailingCheckpointStore {
    inner: Arc<dyn CheckpointStore>,
    failures: Arc<AtomicUsize>,
    saves: Arc<AtomicUsize>,
}

impl FailingCheckpointStore {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn CheckpointStore>) -> Self {
        Self {
            inner,
            failures: Arc::new(AtomicUsize::new(0)),
            saves: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes the next `count` saves fail.
    pub fn fail_next_saves(&self, count: usize) {
        self.failures.fetch_add(count, Ordering::SeqCst);
    }

    /// Save attempts seen, failed ones included.
    #[must_use]
    pub fn save_attempts(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for FailingCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailingCheckpointStore")
            .field("pending_failures", &self.failures.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CheckpointStore for FailingCheckpointStore {
    async fn load(&self, group: &str, topic: &str, partition: PartitionId) -> Result<Option<Offset>, CheckpointError> {
        self.inner.load(group, topic, partition).await
    }

    async fn save(&self, group: &str, topic: &str, partition: PartitionId, offset: Offset) -> Result<(), CheckpointError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(CheckpointError::persist(partition, offset, "disk full"));
        }
        self.inner.save(group, topic, partition, offset).await
    }
}
