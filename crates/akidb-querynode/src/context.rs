//! Request-scoped cancellation and deadline.

use std::future::Future;
use std::time::Duration;

use akidb_core::{CoreError, CoreResult};
use tokio::sync::watch;
use tokio::time::Instant;

/// Cancellation signal and optional deadline carried by a request.
///
/// Cloning is cheap; all clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Handle that cancels every context derived from it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl RequestContext {
    /// A context that is never cancelled.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context plus the handle that cancels it.
    #[must_use]
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                cancel: Some(rx),
                deadline: None,
            },
            CancelHandle { tx },
        )
    }

    /// Returns a copy that also expires after `timeout`, keeping the earlier deadline.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing <= candidate => existing,
            _ => candidate,
        };
        Self {
            cancel: self.cancel.clone(),
            deadline: Some(deadline),
        }
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        let cancelled = self.cancel.as_ref().is_some_and(|rx| *rx.borrow());
        let expired = self.deadline.is_some_and(|d| Instant::now() >= d);
        cancelled || expired
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        let cancelled = async {
            match self.cancel.clone() {
                Some(mut rx) => {
                    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                        // Handle dropped without cancelling.
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancelled => {}
            _ = expired => {}
        }
    }

    /// Runs `work` unless the context fires first, in which case `Cancelled` is returned.
    pub async fn run<T, F>(&self, work: F) -> CoreResult<T>
    where
        F: Future<Output = CoreResult<T>>,
    {
        if self.is_done() {
            return Err(CoreError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.done() => Err(CoreError::Cancelled),
            result = work => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_runs_to_completion() {
        let ctx = RequestContext::background();
        assert!(!ctx.is_done());
        let value = ctx.run(async { Ok::<_, CoreError>(5) }).await.unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_work() {
        let (ctx, handle) = RequestContext::with_cancel();
        let task = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                ctx.run(async {
                    std::future::pending::<()>().await;
                    Ok::<_, CoreError>(())
                })
                .await
            })
        };
        handle.cancel();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert!(ctx.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = RequestContext::background().with_timeout(Duration::from_millis(50));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, CoreError>(())
            })
            .await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }

    #[tokio::test]
    async fn test_dropped_handle_does_not_cancel() {
        let (ctx, handle) = RequestContext::with_cancel();
        drop(handle);
        assert!(!ctx.is_done());
        let value = ctx.run(async { Ok::<_, CoreError>(1) }).await.unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn test_with_timeout_keeps_earlier_deadline() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let short = RequestContext::background().with_timeout(Duration::from_millis(10));
            let longer = short.with_timeout(Duration::from_secs(60));
            assert_eq!(short.deadline(), longer.deadline());
        });
    }
}
