use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

use akidb_core::{CoreError, CoreResult};

/// Bounded executor for watch and load work.
///
/// Each task holds one semaphore permit for its whole run. Closing the pool
/// rejects new admissions; tasks already admitted run to completion.
#[derive(Debug, Clone)]
pub struct TaskPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl TaskPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held by a running task.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn close(&self) {
        self.semaphore.close();
        tracing::info!("task pool closed");
    }

    /// Waits for a permit, then runs `task` on the runtime.
    pub async fn submit<T, F>(&self, name: &str, task: F) -> CoreResult<T>
    where
        F: Future<Output = CoreResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| CoreError::internal(format!("task pool closed, cannot run {name}")))?;

        let handle = tokio::spawn(async move {
            let _permit = permit;
            task.await
        });

        handle
            .await
            .map_err(|err| CoreError::internal(format!("task {name} failed: {err}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_submit_returns_task_result() {
        let pool = TaskPool::new(2);
        let value = pool.submit("answer", async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects() {
        let pool = TaskPool::new(1);
        pool.close();
        let err = pool.submit("load", async { Ok(()) }).await.unwrap_err();
        assert!(err.to_string().contains("task pool closed"));
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let pool = TaskPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let pool = pool.clone();
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    pool.submit("work", async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    fn pool_should_panic() -> bool {
        true
    }

    #[tokio::test]
    async fn test_panicking_task_is_internal_error() {
        let pool = TaskPool::new(1);
        let err = pool
            .submit("boom", async {
                if pool_should_panic() {
                    panic!("boom");
                }
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Internal { .. }));
        assert_eq!(pool.available(), 1);
    }
}
