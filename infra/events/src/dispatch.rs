use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::trace;

/// Bounded pool for per-message handler tasks.
///
/// `spawn` waits for a free slot before starting the task, so a saturated pool applies
/// backpressure to the read loop feeding it instead of growing without limit.
#[derive(Debug, Clone)]
pub(crate) struct Dispatcher {
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub(crate) fn new(max_in_flight: usize) -> Self {
        Self { permits: Arc::new(Semaphore::new(max_in_flight.max(1))) }
    }

    /// Runs `task` on the pool. Returns `false` if the pool was shut down first.
    pub(crate) async fn spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            trace!("dispatcher closed, dropping task");
            return false;
        };
        tokio::spawn(async move {
            task.await;
            drop(permit);
        });
        true
    }

    /// Refuses new tasks. Running tasks finish normally.
    pub(crate) fn shutdown(&self) {
        self.permits.close();
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn never_exceeds_max_in_flight() {
        let pool = Dispatcher::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let (running, peak, done) = (running.clone(), peak.clone(), done.clone());
            pool.spawn(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while done.load(Ordering::SeqCst) < 6 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_tasks() {
        let pool = Dispatcher::new(1);
        pool.shutdown();
        let ran = Arc::new(Notify::new());
        let accepted = pool.spawn({
            let ran = ran.clone();
            async move { ran.notify_one() }
        })
        .await;
        assert!(!accepted);
    }
}
