//! A single cancellation token threaded through every engine call, provider
//! call, tool execution, and subprocess — the one context value the
//! concurrency model relies on instead of a scattered set of flags.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cheaply cloneable; every clone observes the same cancellation state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<Inner>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the token cancelled and wake every waiter. Idempotent.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once `cancel()` is called. A no-op future if already
    /// cancelled, so callers can `select!` against it at any suspension
    /// point without racing a cancellation that happened before the select.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            let notified = self.0.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }

    /// Create a child token that is cancelled whenever `self` is, but can
    /// also be cancelled independently without affecting `self`. Used by the
    /// scheduler to cancel a single worker without tearing down the whole
    /// workflow — implemented by spawning a forwarding task rather than a
    /// true hierarchy, matching the flat token shape of the rest of the crate.
    pub fn child(&self) -> Self {
        let child = Self::new();
        let parent = self.clone();
        let child_clone = child.clone();
        tokio::spawn(async move {
            parent.cancelled().await;
            child_clone.cancel();
        });
        child
    }
}
