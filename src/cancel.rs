//! Cancellation authority shared between a runner and its callers.
//!
//! [`CancelSource`] is the authority: it fires exactly once. [`CancelToken`]
//! is the observer side handed to background work and to individual pull
//! calls. Cancellation is cooperative; observers either poll
//! [`CancelToken::is_cancelled`] or await [`CancelToken::cancelled`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// The signalling side of a cancellation authority.
#[derive(Debug, Clone, Default)]
pub struct CancelSource {
    inner: Arc<CancelInner>,
}

impl CancelSource {
    /// Create a new, unfired authority.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the authority. Idempotent; wakes every waiting observer.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether the authority has fired.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// An observer handle for this authority.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            inner: self.inner.clone(),
        }
    }
}

/// The observing side of a cancellation authority.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// Whether the authority has fired.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Wait until the authority fires.
    ///
    /// The flag is re-checked after registering with the notifier, so a
    /// cancellation racing with registration is never missed.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_sticky_and_idempotent() {
        let source = CancelSource::new();
        let token = source.token();
        assert!(!token.is_cancelled());
        source.cancel();
        source.cancel();
        assert!(source.is_cancelled());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let source = CancelSource::new();
        let token = source.token();
        let waiter = tokio::spawn(async move { token.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        source.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_fired() {
        let source = CancelSource::new();
        source.cancel();
        source.token().cancelled().await;
    }
}
