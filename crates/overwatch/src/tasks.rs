//! Bounded pool for fire-and-forget background work.
//!
//! Analyses, callbacks and learning feedback run here so callers never wait
//! on them. Delivery is at most once and best effort: a task that is still
//! queued or running when the shutdown grace period ends is abandoned.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::TaskPoolConfig;

/// Semaphore-bounded background task pool.
#[derive(Clone)]
pub struct TaskPool {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl TaskPool {
    #[must_use]
    pub fn new(config: &TaskPoolConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Token cancelled when the pool abandons its tasks.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn a task. Returns `false` if the pool is shutting down.
    pub fn spawn<F>(&self, name: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            warn!(task = name, "Task pool closed, dropping task");
            return false;
        }

        let permits = Arc::clone(&self.permits);
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            let _permit = tokio::select! {
                () = cancel.cancelled() => return,
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            tokio::select! {
                () = cancel.cancelled() => debug!(task = name, "Task abandoned"),
                () = task => debug!(task = name, "Task finished"),
            }
        });
        true
    }

    /// Tasks queued or running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting work and wait up to `grace` for in-flight tasks.
    ///
    /// Returns `true` if every task finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if drained {
            info!("Task pool drained");
        } else {
            warn!(remaining = self.tracker.len(), "Abandoning background tasks after grace period");
            self.cancel.cancel();
            self.tracker.wait().await;
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool(max_concurrent: usize) -> TaskPool {
        TaskPool::new(&TaskPoolConfig {
            max_concurrent,
            shutdown_grace_secs: 1,
        })
    }

    #[tokio::test]
    async fn test_tasks_run_and_drain() {
        let pool = pool(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            assert!(pool.spawn("count", async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert!(pool.shutdown(Duration::from_secs(1)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let pool = pool(1);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.spawn("bounded", async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }
        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_slow_tasks() {
        let pool = pool(1);
        let finished = Arc::new(AtomicUsize::new(0));
        let done = Arc::clone(&finished);
        pool.spawn("slow", async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            done.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!pool.shutdown(Duration::from_secs(1)).await);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert!(pool.cancellation().is_cancelled());
    }

    #[tokio::test]
    async fn test_spawn_after_shutdown_rejected() {
        let pool = pool(1);
        pool.shutdown(Duration::from_millis(10)).await;
        assert!(!pool.spawn("late", async {}));
    }
}
