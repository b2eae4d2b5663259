//! Shutdown coordination: a cancellation token plus a tracker for
//! background processing tasks, drained under a bounded grace period.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::warn;

pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(25);

#[derive(Debug, Clone)]
pub struct ShutdownController {
    token: CancellationToken,
    tracker: TaskTracker,
    shutting_down: Arc<AtomicBool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Shared flag handed to components that gate new work.
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.shutting_down.clone()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Track a background task so shutdown can wait on it.
    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(future)
    }

    /// Begin shutdown: flag new work away, then wait for in-flight tasks up
    /// to the grace period, then cancel whatever is still running.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.tracker.close();

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                grace_seconds = grace.as_secs(),
                "grace period elapsed, cancelling in-flight processing tasks"
            );
            self.token.cancel();
            // Give cancelled tasks a moment to unwind their cleanup paths.
            let _ = tokio::time::timeout(Duration::from_secs(2), self.tracker.wait()).await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_waits_for_tracked_tasks() {
        let controller = ShutdownController::new();
        let done = Arc::new(AtomicBool::new(false));

        let flag = done.clone();
        controller.spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            flag.store(true, Ordering::SeqCst);
        });

        controller.shutdown(Duration::from_secs(5)).await;
        assert!(done.load(Ordering::SeqCst));
        assert!(controller.is_shutting_down());
    }

    #[tokio::test]
    async fn shutdown_cancels_after_grace() {
        let controller = ShutdownController::new();
        let token = controller.token();

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        controller.spawn(async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });

        controller.shutdown(Duration::from_millis(20)).await;
        assert!(cancelled.load(Ordering::SeqCst));
    }
}
