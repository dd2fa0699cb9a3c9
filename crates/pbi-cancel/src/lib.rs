//! Shared cooperative cancellation token.
//!
//! A thin wrapper over `tokio_util`-style cancellation built directly on
//! `tokio::sync::Notify`, so every outbound call (the webhook worker's HTTP
//! POST in particular) can race its work against a single shutdown signal and
//! release its connection on whichever side finishes first.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cloneable handle to a single cancellation signal.
///
/// Cloning a `CancelToken` does not create a new signal; all clones observe
/// the same cancellation. Call [`CancelToken::cancel`] once to wake every
/// waiter.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation to every clone of this token. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelToken::cancel`] has been called. Resolves
    /// immediately if it already has been.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Runs `fut` to completion, or returns `None` if cancellation fires
    /// first. The loser of the race is dropped, which for an in-flight
    /// `reqwest` request tears down its connection.
    pub async fn race<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            out = fut => Some(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_if_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("cancelled() should not block once already cancelled");
    }

    #[tokio::test]
    async fn race_returns_none_when_cancelled_first() {
        let token = CancelToken::new();
        let racer = token.clone();
        let handle = tokio::spawn(async move {
            racer
                .race(async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    "finished"
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        let result = handle.await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn race_returns_some_when_future_wins() {
        let token = CancelToken::new();
        let result = token.race(async { 42 }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn clones_share_the_same_signal() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
