//! Cooperative cancellation token threaded scheduler → tier analyzer → LLM client.
//!
//! The teacher depends on `tokio` alone (no `tokio-util`), so this is a
//! minimal hand-rolled token rather than `tokio_util::sync::CancellationToken`:
//! an `AtomicBool` for a cheap synchronous check plus a `Notify` so an
//! in-flight `await` can wake up immediately instead of polling. Grounded on
//! the teacher's `CircuitBreaker`/`RetryExecutor` pattern of owning small
//! pieces of concurrency state directly on a struct rather than reaching for
//! a crate (`src/internals/retry.rs`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cloneable cancellation signal. Cloning shares the same underlying flag;
/// cancelling any clone cancels all of them.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// A fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent; wakes every waiter on `cancelled()`.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Synchronous check, for the per-job loop boundary in the tier analyzer.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once cancelled. Intended for `tokio::select!` alongside an
    /// in-flight LLM request so the request can be abandoned promptly rather
    /// than run to completion or timeout.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_resolves_immediately_once_cancel_was_already_called() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("cancelled() should resolve without waiting");
    }

    #[tokio::test]
    async fn cancelled_wakes_a_waiter_when_cancel_is_called_later() {
        let token = CancellationToken::new();
        let waiter_token = token.clone();
        let waiter = tokio::spawn(async move {
            waiter_token.cancelled().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter should complete after cancel")
            .unwrap();
    }

    #[test]
    fn clones_share_the_same_cancellation_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
