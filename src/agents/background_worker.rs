//! Background task tracking (§5, §4.13)
//!
//! A managed alternative to ad-hoc `tokio::spawn`: every submitted task gets
//! a cancellation token, a tracked status, and participates in the shared
//! stop signal on shutdown. Grounded on
//! `acton-service/src/agents/background_worker.rs`'s `BackgroundWorker`,
//! stripped of the actor-hosted messaging layer this crate has no use for
//! (see the grounding ledger's dependency-drop note) and driven directly
//! through a shared `DashMap`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TaskStatus {
    #[default]
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

struct TaskInfo {
    join_handle: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    status: Arc<Mutex<TaskStatus>>,
}

/// Tracks every background task spawned through it, so shutdown can cancel
/// and bound-join the whole set with one call.
#[derive(Clone, Default)]
pub struct BackgroundWorker {
    tasks: Arc<DashMap<String, TaskInfo>>,
    root: CancellationToken,
}

impl BackgroundWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `work`, tracked under `task_id`. A duplicate `task_id`
    /// replaces the previous entry's tracking (the old task keeps running
    /// to completion but is no longer individually cancellable by name).
    pub fn submit<F, Fut>(&self, task_id: impl Into<String>, work: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let task_id = task_id.into();
        let cancel = self.root.child_token();
        let cancel_for_task = cancel.clone();
        let status = Arc::new(Mutex::new(TaskStatus::Running));
        let status_for_task = status.clone();
        let id_for_task = task_id.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel_for_task.cancelled() => {
                    debug!(task_id = %id_for_task, "background task cancelled");
                    *status_for_task.lock().await = TaskStatus::Cancelled;
                }
                result = work() => {
                    match result {
                        Ok(()) => *status_for_task.lock().await = TaskStatus::Completed,
                        Err(e) => {
                            warn!(task_id = %id_for_task, error = %e, "background task failed");
                            *status_for_task.lock().await = TaskStatus::Failed(e);
                        }
                    }
                }
            }
        });

        self.tasks.insert(
            task_id.clone(),
            TaskInfo { join_handle: Mutex::new(Some(handle)), cancel, status },
        );
        info!(task_id, "background task submitted");
    }

    pub async fn cancel(&self, task_id: &str) {
        if let Some(entry) = self.tasks.get(task_id) {
            entry.cancel.cancel();
            let mut handle_lock = entry.join_handle.lock().await;
            if let Some(handle) = handle_lock.take() {
                let _ = tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, handle).await;
            }
        }
    }

    pub async fn status(&self, task_id: &str) -> Option<TaskStatus> {
        let entry = self.tasks.get(task_id)?;
        Some(entry.status.lock().await.clone())
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// §4.13: cancels every tracked task and bound-joins each with a 5 s
    /// timeout, logging (not panicking) on a task that overruns it.
    pub async fn shutdown(&self) {
        let count = self.tasks.len();
        if count == 0 {
            return;
        }
        info!(count, "cancelling background tasks");
        self.root.cancel();

        for entry in self.tasks.iter() {
            let mut handle_lock = entry.join_handle.lock().await;
            if let Some(handle) = handle_lock.take() {
                match tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, handle).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "background task panicked during shutdown"),
                    Err(_) => warn!("background task shutdown timed out"),
                }
            }
        }
        info!("all background tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_completion_status() {
        let worker = BackgroundWorker::new();
        worker.submit("t1", || async { Ok(()) });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(worker.status("t1").await, Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn shutdown_cancels_long_running_task() {
        let worker = BackgroundWorker::new();
        worker.submit("t2", || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });
        worker.shutdown().await;
        assert_eq!(worker.status("t2").await, Some(TaskStatus::Cancelled));
    }
}
