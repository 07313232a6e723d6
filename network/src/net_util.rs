// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task supervision helpers for the session's background work

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Token for signaling cancelation of a task
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<tokio::sync::Notify>,
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new cancellation token
    pub fn new() -> Self {
        Self {
            inner: Arc::new(tokio::sync::Notify::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if the token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel the token, notifying all waiters
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify_waiters();
    }

    /// Wait for cancellation
    pub async fn cancelled(&self) {
        let notified = self.inner.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not lost
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Set of named background tasks that are joined together on shutdown
#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl TaskSet {
    /// Create an empty task set
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task on the current runtime and track its handle
    pub fn spawn<F>(&self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        tracing::trace!(task = %name, "Spawning background task");
        let handle = tokio::spawn(future);

        let mut tasks = self.tasks.lock();
        tasks.retain(|(_, h)| !h.is_finished());
        tasks.push((name, handle));
    }

    /// Number of tasks that have not finished yet
    pub fn active(&self) -> usize {
        self.tasks
            .lock()
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .count()
    }

    /// Names of the tasks that have not finished yet
    pub fn active_names(&self) -> Vec<String> {
        self.tasks
            .lock()
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Wait for every tracked task, aborting any still running at the deadline.
    ///
    /// Tasks spawned while the join is in progress are picked up as well.
    /// Returns the number of tasks that had to be aborted.
    pub async fn join_all(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut aborted = 0;

        loop {
            let batch: Vec<_> = std::mem::take(&mut *self.tasks.lock());
            if batch.is_empty() {
                break;
            }

            for (name, mut handle) in batch {
                match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) if e.is_panic() => {
                        tracing::error!(task = %name, "Task panicked during shutdown");
                    }
                    Ok(Err(_)) => {}
                    Err(_) => {
                        tracing::warn!(task = %name, "Task did not shut down within timeout, aborting");
                        handle.abort();
                        aborted += 1;
                    }
                }
            }
        }

        aborted
    }
}
