//! A group of named partition worker tasks awaited together.

use futures::future::join_all;
use parking_lot::Mutex;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::error;

/// Tasks spawned together and awaited together.
///
/// A worker failing does not cancel its siblings: partitions halt
/// independently. A task that panics is reported as an error carrying its
/// name. Shutdown is signalled through the workers' own
/// [`ShutdownToken`](super::ShutdownToken), not through the group.
pub struct WorkerGroup<T> {
    handles: Mutex<Vec<(String, JoinHandle<T>)>>,
}

impl<T: Send + 'static> WorkerGroup<T> {
    /// Spawns `task` on the runtime under `name`.
    pub fn spawn<Fut>(&self, name: impl Into<String>, task: Fut)
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.handles.lock().push((name.into(), handle));
    }

    /// Waits for every task. Outcomes are returned in spawn order.
    pub async fn wait(&self) -> Vec<(String, Result<T, String>)> {
        let handles = std::mem::take(&mut *self.handles.lock());
        join_all(handles.into_iter().map(|(name, handle)| async move {
            let outcome = handle.await.map_err(|join_error| {
                error!(task = %name, error = %join_error, "Worker task failed");
                format!("task join error: {join_error}")
            });
            (name, outcome)
        }))
        .await
    }
}

impl<T> Default for WorkerGroup<T> {
    fn default() -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
        }
    }
}

impl<T> std::fmt::Debug for WorkerGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerGroup")
            .field("pending", &self.handles.lock().len())
            .finish()
    }
}
