//! In-process graph store with optimistic concurrency and optional snapshots.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{GraphStore, Session};
use crate::errors::StoreError;
use crate::model::{is_absolute_iri, GraphDocument, Term, Triple};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StreamState {
    version: u64,
    triples: BTreeSet<Triple>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    streams: BTreeMap<String, StreamState>,
}

struct StoreInner {
    streams: RwLock<BTreeMap<String, StreamState>>,
    commit_lock: tokio::sync::Mutex<()>,
    snapshot_path: Option<PathBuf>,
    commits: AtomicU64,
}

impl StoreInner {
    fn version(&self, stream: &str) -> u64 {
        self.streams.read().get(stream).map_or(0, |s| s.version)
    }
}

/// A graph store holding named streams of triples in memory.
///
/// Each stream carries a version that increases on every commit touching it.
/// A session remembers the version it first wrote against; committing after
/// another session changed that stream fails with [`StoreError::Conflict`].
/// Duplicate triples are no-ops, so committing the same document twice leaves
/// a stream unchanged.
///
/// When created with [`MemoryGraphStore::with_snapshot`], every commit rewrites
/// a JSON snapshot before becoming visible, and the snapshot is reloaded on open.
#[derive(Clone)]
pub struct MemoryGraphStore {
    inner: Arc<StoreInner>,
}

impl MemoryGraphStore {
    /// Creates an empty, purely in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::from_streams(BTreeMap::new(), None)
    }

    /// Opens a store persisted to `path`, loading it if the file exists.
    pub async fn with_snapshot(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let streams = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| {
                    StoreError::Io(format!("corrupt snapshot '{}': {e}", path.display()))
                })?;
                info!(
                    path = %path.display(),
                    streams = snapshot.streams.len(),
                    "Loaded graph store snapshot"
                );
                snapshot.streams
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "cannot read snapshot '{}': {e}",
                    path.display()
                )))
            }
        };
        Ok(Self::from_streams(streams, Some(path)))
    }

    fn from_streams(streams: BTreeMap<String, StreamState>, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                streams: RwLock::new(streams),
                commit_lock: tokio::sync::Mutex::new(()),
                snapshot_path,
                commits: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the committed triples of a stream in canonical order.
    #[must_use]
    pub fn triples(&self, stream: &str) -> Vec<Triple> {
        self.inner
            .streams
            .read()
            .get(stream)
            .map(|s| s.triples.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of committed triples in a stream.
    #[must_use]
    pub fn stream_len(&self, stream: &str) -> usize {
        self.inner.streams.read().get(stream).map_or(0, |s| s.triples.len())
    }

    /// Returns true if the stream holds `triple`.
    #[must_use]
    pub fn contains(&self, stream: &str, triple: &Triple) -> bool {
        self.inner
            .streams
            .read()
            .get(stream)
            .is_some_and(|s| s.triples.contains(triple))
    }

    /// Returns the names of all streams that have been written.
    #[must_use]
    pub fn stream_names(&self) -> Vec<String> {
        self.inner.streams.read().keys().cloned().collect()
    }

    /// Returns the current version of a stream (0 if never written).
    #[must_use]
    pub fn version(&self, stream: &str) -> u64 {
        self.inner.version(stream)
    }

    /// Returns the number of successful commits since the store was opened.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.inner.commits.load(Ordering::SeqCst)
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGraphStore")
            .field("streams", &self.stream_names())
            .field("snapshot_path", &self.inner.snapshot_path)
            .finish()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn open(&self) -> Result<Box<dyn Session>, StoreError> {
        Ok(Box::new(MemorySession::new(Arc::clone(&self.inner))))
    }
}

async fn write_snapshot(path: &Path, streams: &BTreeMap<String, StreamState>) -> Result<(), StoreError> {
    #[derive(Serialize)]
    struct SnapshotRef<'a> {
        streams: &'a BTreeMap<String, StreamState>,
    }

    let bytes = serde_json::to_vec(&SnapshotRef { streams })
        .map_err(|e| StoreError::Io(format!("snapshot encoding failed: {e}")))?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| StoreError::Io(format!("cannot write '{}': {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::Io(format!("cannot replace '{}': {e}", path.display())))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    Committed,
    RolledBack,
}

#[derive(Debug)]
struct StagedStream {
    base_version: u64,
    triples: Vec<Triple>,
}

/// A session on a [`MemoryGraphStore`].
pub struct MemorySession {
    id: String,
    inner: Arc<StoreInner>,
    staged: BTreeMap<String, StagedStream>,
    state: SessionState,
}

impl MemorySession {
    fn new(inner: Arc<StoreInner>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            inner,
            staged: BTreeMap::new(),
            state: SessionState::Open,
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.state == SessionState::Open {
            Ok(())
        } else {
            Err(StoreError::SessionClosed(self.id.clone()))
        }
    }

    /// Returns the number of staged, uncommitted triples.
    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.staged.values().map(|s| s.triples.len()).sum()
    }
}

fn validate(stream: &str, document: &GraphDocument) -> Result<(), StoreError> {
    if stream.trim().is_empty() {
        return Err(StoreError::SchemaViolation("stream name is empty".to_string()));
    }
    for triple in document.triples() {
        if !is_absolute_iri(&triple.subject) {
            return Err(StoreError::SchemaViolation(format!(
                "subject '{}' is not an absolute IRI",
                triple.subject
            )));
        }
        if !is_absolute_iri(&triple.predicate) {
            return Err(StoreError::SchemaViolation(format!(
                "predicate '{}' is not an absolute IRI",
                triple.predicate
            )));
        }
        if let Term::Iri(object) = &triple.object {
            if !is_absolute_iri(object) {
                return Err(StoreError::SchemaViolation(format!(
                    "object '{object}' is not an absolute IRI"
                )));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Session for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_named(&mut self, stream: &str, document: &GraphDocument) -> Result<(), StoreError> {
        self.ensure_open()?;
        validate(stream, document)?;

        let inner = &self.inner;
        let staged = self
            .staged
            .entry(stream.to_string())
            .or_insert_with(|| StagedStream {
                base_version: inner.version(stream),
                triples: Vec::new(),
            });
        staged.triples.extend(document.triples().iter().cloned());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let _guard = self.inner.commit_lock.lock().await;

        let next = {
            let streams = self.inner.streams.read();
            for (name, staged) in &self.staged {
                let current = streams.get(name).map_or(0, |s| s.version);
                if current != staged.base_version {
                    return Err(StoreError::Conflict {
                        stream: name.clone(),
                    });
                }
            }

            let mut next = streams.clone();
            for (name, staged) in &self.staged {
                let state = next.entry(name.clone()).or_default();
                state.version += 1;
                state.triples.extend(staged.triples.iter().cloned());
            }
            next
        };

        if let Some(path) = &self.inner.snapshot_path {
            write_snapshot(path, &next).await?;
        }

        *self.inner.streams.write() = next;
        self.inner.commits.fetch_add(1, Ordering::SeqCst);
        self.state = SessionState::Committed;
        debug!(session = %self.id, streams = self.staged.len(), "Session committed");
        self.staged.clear();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.staged.clear();
        self.state = SessionState::RolledBack;
        debug!(session = %self.id, "Session rolled back");
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), StoreError> {
        if self.state == SessionState::Open && !self.staged.is_empty() {
            debug!(
                session = %self.id,
                staged = self.staged_len(),
                "Closing session with uncommitted writes"
            );
        }
        Ok(())
    }
}
