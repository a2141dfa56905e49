//! Signal-of-Stop: cooperative cancellation primitive.
//!
//! A thread-safe, async-aware cancellation token. Clones share the same
//! underlying state, so cancelling any clone notifies all waiters. Each
//! transfer task holds one as its cancel capability; a session-level token
//! stops the heartbeat ticker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct SignalOfStop {
    internal: Arc<SharedState>,
}

#[derive(Debug, Default)]
struct SharedState {
    closing: AtomicBool,
    notify: Notify,
}

impl SignalOfStop {
    /// Create a new, uncancelled signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to all waiters.
    ///
    /// After this call, `cancelled()` returns `true` and all pending
    /// `wait()` futures complete. Idempotent.
    pub fn cancel(&self) {
        self.internal.closing.store(true, Ordering::Release);
        self.internal.notify.notify_waiters();
    }

    /// Check if cancellation has been signaled.
    pub fn cancelled(&self) -> bool {
        self.internal.closing.load(Ordering::Acquire)
    }

    /// Wait for cancellation to be signaled.
    ///
    /// Returns immediately if already cancelled.
    pub async fn wait(&self) {
        while !self.cancelled() {
            let notified = self.internal.notify.notified();
            if self.cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Clone for SignalOfStop {
    fn clone(&self) -> Self {
        Self {
            internal: Arc::clone(&self.internal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_state() {
        let sos = SignalOfStop::new();
        let clone = sos.clone();
        assert!(!clone.cancelled());
        sos.cancel();
        assert!(clone.cancelled());
        // wait() on an already-cancelled token returns immediately
        clone.wait().await;
    }

    #[tokio::test]
    async fn wait_wakes_on_cancel() {
        let sos = SignalOfStop::new();
        let waiter = sos.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });
        tokio::task::yield_now().await;
        sos.cancel();
        handle.await.unwrap();
    }
}
