//! Commit coordination: scoped transactions and committed-offset tracking.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::{CommitError, StoreError};
use crate::model::{GraphDocument, Offset, PartitionId};
use crate::store::{GraphStore, Session};

/// Writes graph documents into named streams, one scoped session per commit.
///
/// Each commit runs `open → write_named → commit`. If any step fails the
/// session is rolled back before the error is returned, so a failed commit
/// never leaves partial triples behind. The session is closed on every path.
///
/// The coordinator also tracks, per partition, the highest offset whose
/// record reached a terminal state. That is the offset the driver may
/// checkpoint.
pub struct CommitCoordinator {
    store: Arc<dyn GraphStore>,
    terminal: DashMap<PartitionId, Offset>,
}

impl CommitCoordinator {
    /// Creates a coordinator over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            terminal: DashMap::new(),
        }
    }

    /// Commits `document` into `stream` atomically.
    pub async fn commit(&self, stream: &str, document: &GraphDocument) -> Result<(), CommitError> {
        let mut session = self
            .store
            .open()
            .await
            .map_err(|e| CommitError::from_store(stream, e))?;

        let result = write_and_commit(session.as_mut(), stream, document).await;

        if let Err(ref e) = result {
            if let Err(rollback_err) = session.rollback().await {
                // A session that failed mid-commit may already be closed.
                debug!(session = %session.id(), error = %rollback_err, "Rollback after failed commit");
            }
            debug!(session = %session.id(), stream, error = %e, "Commit failed, session rolled back");
        }

        let session_id = session.id().to_string();
        if let Err(e) = session.close().await {
            warn!(session = %session_id, error = %e, "Failed to close store session");
        }

        result.map_err(|e| CommitError::from_store(stream, e))
    }

    /// Commits the document produced from the record at `offset` and marks
    /// that offset terminal on success.
    pub async fn commit_record(
        &self,
        stream: &str,
        partition: PartitionId,
        offset: Offset,
        document: &GraphDocument,
    ) -> Result<(), CommitError> {
        self.commit(stream, document).await?;
        self.mark_terminal(partition, offset);
        Ok(())
    }

    /// Records that the record at `offset` needs no further processing
    /// (committed, or skipped as permanently failed).
    pub fn mark_terminal(&self, partition: PartitionId, offset: Offset) {
        self.terminal
            .entry(partition)
            .and_modify(|current| *current = (*current).max(offset))
            .or_insert(offset);
    }

    /// Returns the highest terminal offset for a partition.
    #[must_use]
    pub fn terminal_offset(&self, partition: PartitionId) -> Option<Offset> {
        self.terminal.get(&partition).map(|entry| *entry)
    }
}

impl std::fmt::Debug for CommitCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitCoordinator")
            .field("partitions", &self.terminal.len())
            .finish_non_exhaustive()
    }
}

async fn write_and_commit(
    session: &mut dyn Session,
    stream: &str,
    document: &GraphDocument,
) -> Result<(), StoreError> {
    session.write_named(stream, document).await?;
    session.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Term, Triple};
    use crate::store::MemoryGraphStore;
    use crate::testing::FlakyStore;

    const STREAM: &str = "http://trellisldp.org/activitystream";

    fn document() -> GraphDocument {
        GraphDocument::new(
            "urn:e:1",
            vec![
                Triple::new("urn:e:1", "http://example.org/a", Term::plain("1")),
                Triple::new("urn:e:1", "http://example.org/b", Term::plain("2")),
            ],
        )
    }

    #[tokio::test]
    async fn test_commit_writes_document() {
        let store = MemoryGraphStore::new();
        let coordinator = CommitCoordinator::new(Arc::new(store.clone()));

        coordinator.commit_record(STREAM, 0, 7, &document()).await.unwrap();

        assert_eq!(store.stream_len(STREAM), 2);
        assert_eq!(coordinator.terminal_offset(0), Some(7));
        assert_eq!(coordinator.terminal_offset(1), None);
    }

    #[tokio::test]
    async fn test_commit_twice_is_idempotent() {
        let store = MemoryGraphStore::new();
        let coordinator = CommitCoordinator::new(Arc::new(store.clone()));

        coordinator.commit(STREAM, &document()).await.unwrap();
        let before = store.triples(STREAM);
        coordinator.commit(STREAM, &document()).await.unwrap();

        assert_eq!(store.triples(STREAM), before);
    }

    #[tokio::test]
    async fn test_transient_failure_rolls_back() {
        let store = MemoryGraphStore::new();
        let flaky = FlakyStore::new(Arc::new(store.clone()));
        flaky.fail_next_commits(1, StoreError::Unavailable("connection reset".into()));
        let coordinator = CommitCoordinator::new(Arc::new(flaky.clone()));

        let err = coordinator.commit_record(STREAM, 0, 1, &document()).await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(store.stream_len(STREAM), 0);
        assert_eq!(coordinator.terminal_offset(0), None);
        assert_eq!(flaky.rollbacks(), 1);

        coordinator.commit_record(STREAM, 0, 1, &document()).await.unwrap();
        assert_eq!(store.stream_len(STREAM), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_classified() {
        let coordinator = CommitCoordinator::new(Arc::new(MemoryGraphStore::new()));
        let bad = GraphDocument::new(
            "urn:e:1",
            vec![Triple::new("urn:e:1", "relative", Term::plain("x"))],
        );

        let err = coordinator.commit(STREAM, &bad).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.stream(), STREAM);
    }

    #[tokio::test]
    async fn test_open_failure_is_transient() {
        let flaky = FlakyStore::new(Arc::new(MemoryGraphStore::new()));
        flaky.set_available(false);
        let coordinator = CommitCoordinator::new(Arc::new(flaky));

        let err = coordinator.commit(STREAM, &document()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_terminal_offset_never_moves_backwards() {
        let coordinator = CommitCoordinator::new(Arc::new(MemoryGraphStore::new()));
        coordinator.mark_terminal(2, 10);
        coordinator.mark_terminal(2, 4);
        assert_eq!(coordinator.terminal_offset(2), Some(10));
    }
}
