//! Background work that must outlive the response
//!
//! Cache writes, poisoned-entry deletes and usage records are dispatched
//! here instead of being awaited on the request path. The registry keeps a
//! live count so graceful shutdown can drain everything that was promised
//! to finish.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Registry of in-flight background tasks
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    pending: Arc<AtomicUsize>,
    done: Arc<Notify>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task that the process will wait for on shutdown.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let pending = Arc::clone(&self.pending);
        let done = Arc::clone(&self.done);
        tokio::spawn(async move {
            future.await;
            pending.fetch_sub(1, Ordering::AcqRel);
            done.notify_waiters();
        });
    }

    /// Number of tasks still running.
    pub fn in_flight(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait until every spawned task has completed.
    pub async fn drain(&self) {
        loop {
            let notified = self.done.notified();
            if self.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for BackgroundTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTasks")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
