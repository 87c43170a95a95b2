//! Durable per-partition checkpoints.
//!
//! A checkpoint is the highest offset of a partition whose record has been
//! durably committed (or permanently skipped). Consumers resume at
//! `checkpoint + 1`. Saving an offset lower than the current checkpoint is a
//! no-op, so a checkpoint never moves backwards.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::CheckpointError;
use crate::model::{Offset, PartitionId};

/// Storage for consumer group checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads the checkpoint of one partition for a group and topic.
    async fn load(
        &self,
        group: &str,
        topic: &str,
        partition: PartitionId,
    ) -> Result<Option<Offset>, CheckpointError>;

    /// Persists a checkpoint.
    async fn save(
        &self,
        group: &str,
        topic: &str,
        partition: PartitionId,
        offset: Offset,
    ) -> Result<(), CheckpointError>;
}

/// Checkpoints kept in memory, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    offsets: DashMap<(String, String, PartitionId), Offset>,
}

impl MemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(
        &self,
        group: &str,
        topic: &str,
        partition: PartitionId,
    ) -> Result<Option<Offset>, CheckpointError> {
        let key = (group.to_string(), topic.to_string(), partition);
        Ok(self.offsets.get(&key).map(|entry| *entry))
    }

    async fn save(
        &self,
        group: &str,
        topic: &str,
        partition: PartitionId,
        offset: Offset,
    ) -> Result<(), CheckpointError> {
        self.offsets
            .entry((group.to_string(), topic.to_string(), partition))
            .and_modify(|current| *current = (*current).max(offset))
            .or_insert(offset);
        Ok(())
    }
}

/// On-disk layout: `{"groups": {"<group>/<topic>": {"<partition>": offset}}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CheckpointFile {
    #[serde(default)]
    groups: BTreeMap<String, BTreeMap<PartitionId, Offset>>,
}

fn group_key(group: &str, topic: &str) -> String {
    format!("{group}/{topic}")
}

/// Checkpoints persisted to a JSON file.
///
/// Every save rewrites the file through a temporary sibling and a rename, so
/// a crash mid-write leaves the previous checkpoints intact.
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    state: tokio::sync::Mutex<CheckpointFile>,
}

impl FileCheckpointStore {
    /// Opens the checkpoint file at `path`, creating it on first save.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CheckpointError::Load(format!("'{}': {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CheckpointFile::default(),
            Err(e) => return Err(CheckpointError::Load(format!("'{}': {e}", path.display()))),
        };
        Ok(Self {
            path,
            state: tokio::sync::Mutex::new(state),
        })
    }

    /// Returns the checkpoint file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, file: &CheckpointFile) -> Result<(), String> {
        let bytes = serde_json::to_vec_pretty(file).map_err(|e| e.to_string())?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(|e| e.to_string())?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(
        &self,
        group: &str,
        topic: &str,
        partition: PartitionId,
    ) -> Result<Option<Offset>, CheckpointError> {
        let state = self.state.lock().await;
        Ok(state
            .groups
            .get(&group_key(group, topic))
            .and_then(|partitions| partitions.get(&partition))
            .copied())
    }

    async fn save(
        &self,
        group: &str,
        topic: &str,
        partition: PartitionId,
        offset: Offset,
    ) -> Result<(), CheckpointError> {
        let mut state = self.state.lock().await;
        let key = group_key(group, topic);
        let current = state.groups.get(&key).and_then(|p| p.get(&partition)).copied();
        if current.is_some_and(|c| c >= offset) {
            return Ok(());
        }

        let mut next = state.clone();
        next.groups.entry(key).or_default().insert(partition, offset);
        self.persist(&next)
            .await
            .map_err(|reason| CheckpointError::persist(partition, offset, reason))?;
        *state = next;

        debug!(group, topic, partition, offset, "Checkpoint persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_memory_store_never_moves_backwards() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.load("g", "t", 0).await.unwrap(), None);

        assert_ok!(store.save("g", "t", 0, 10).await);
        assert_ok!(store.save("g", "t", 0, 3).await);

        assert_eq!(store.load("g", "t", 0).await.unwrap(), Some(10));
        assert_eq!(store.load("other", "t", 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");

        let store = FileCheckpointStore::open(&path).await.unwrap();
        store.save("group", "activities", 0, 41).await.unwrap();
        store.save("group", "activities", 1, 7).await.unwrap();
        drop(store);

        let reopened = FileCheckpointStore::open(&path).await.unwrap();
        assert_eq!(reopened.load("group", "activities", 0).await.unwrap(), Some(41));
        assert_eq!(reopened.load("group", "activities", 1).await.unwrap(), Some(7));
        assert_eq!(reopened.load("group", "activities", 2).await.unwrap(), None);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_persist_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("checkpoints.json");

        let store = FileCheckpointStore::open(&path).await.unwrap();
        let err = assert_err!(store.save("g", "t", 3, 9).await);

        assert!(matches!(err, CheckpointError::Persist { partition: 3, offset: 9, .. }));
        assert_eq!(store.load("g", "t", 3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        std::fs::write(&path, "garbage").unwrap();

        let err = FileCheckpointStore::open(&path).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Load(_)));
    }

    #[tokio::test]
    async fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");

        let store = FileCheckpointStore::open(&path).await.unwrap();
        assert_ok!(store.save("ingest", "activities", 2, 17).await);

        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, serde_json::json!({"groups": {"ingest/activities": {"2": 17}}}));
    }
}
