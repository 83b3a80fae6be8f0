//! One-shot shutdown signal.
//!
//! Set exactly once, never reset. Blocking loops poll
//! [`is_triggered`](ShutdownSignal::is_triggered); async loops
//! `select!` on [`wait`](ShutdownSignal::wait).

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable handle to a set-once flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the flag and wake every waiter. Returns `true` on the first call.
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    #[inline]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is set (immediately if it already is).
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // Sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
