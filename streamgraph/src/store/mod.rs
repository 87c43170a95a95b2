//! Target graph store contract.
//!
//! A store hands out sessions; a session stages writes into named streams
//! and publishes them atomically on commit. Writes staged by a session that is
//! rolled back, closed or dropped before commit are never visible.

mod memory;

pub use memory::{MemoryGraphStore, MemorySession};

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::model::GraphDocument;

/// A transactional store of named triple streams.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Opens a new session.
    async fn open(&self) -> Result<Box<dyn Session>, StoreError>;
}

/// One transaction against a [`GraphStore`].
#[async_trait]
pub trait Session: Send {
    /// Returns an identifier for log correlation.
    fn id(&self) -> &str;

    /// Stages every triple of `document` into `stream`.
    async fn write_named(&mut self, stream: &str, document: &GraphDocument) -> Result<(), StoreError>;

    /// Publishes all staged writes atomically.
    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Discards all staged writes.
    async fn rollback(&mut self) -> Result<(), StoreError>;

    /// Releases the session. Uncommitted writes are discarded.
    async fn close(self: Box<Self>) -> Result<(), StoreError>;
}
