//! Cooperative cancellation without coroutines (§9 design note): a broadcast
//! "cancel token" per Job — an atomic "canceled" flag plus a one-shot wait
//! primitive. Leaf algorithms poll `is_canceled()` between work units; the
//! Timeout Supervisor or `Cancel` flips it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

struct Inner {
    canceled: AtomicBool,
    notify: Notify,
}

/// Cheaply cloneable handle shared between the dispatcher, the worker running
/// the job, and the timeout supervisor.
#[derive(Clone)]
pub struct CancelToken(Arc<Inner>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            canceled: AtomicBool::new(false),
            notify: Notify::new(),
        }))
    }

    pub fn is_canceled(&self) -> bool {
        self.0.canceled.load(Ordering::Acquire)
    }

    /// Idempotent up to the first call (Q4/R3): `swap` only returns `false` once,
    /// so `notify_waiters` only fires on the canceled transition. Later calls are
    /// a no-op read-modify-write, never a double notification.
    pub fn cancel(&self) {
        if !self.0.canceled.swap(true, Ordering::AcqRel) {
            self.0.notify.notify_waiters();
        }
    }

    /// Suspend until cancellation, for algorithms that want to await rather than
    /// poll (most of this crate's leaf algorithms poll instead, matching the Go
    /// original's `select { case <-cancelCh: ... default: }` shape).
    pub async fn canceled(&self) {
        if self.is_canceled() {
            return;
        }
        self.0.notify.notified().await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_canceled());
        token.cancel();
        assert!(token.is_canceled());
        token.cancel(); // second call must not panic or misbehave (R3/Q4)
        assert!(token.is_canceled());
    }

    #[tokio::test]
    async fn test_canceled_future_resolves() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.canceled().await;
        });
        token.cancel();
        handle.await.unwrap();
    }
}
