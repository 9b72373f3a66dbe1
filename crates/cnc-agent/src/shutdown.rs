//! Structured cancellation for the agent's task set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// A cloneable root cancellation signal.
///
/// Every agent task holds a clone and selects on [`cancelled`](Self::cancelled);
/// triggering shutdown once cancels all of them. Idempotent: only the first
/// [`shutdown`](Self::shutdown) call has effect.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    initiated: Arc<AtomicBool>,
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            initiated: Arc::new(AtomicBool::new(false)),
            tx: Arc::new(tx),
        }
    }

    /// Triggers graceful shutdown. Each task's shutdown path flushes its owned
    /// resource (open batch, warm/cold files, sockets) before returning.
    pub fn shutdown(&self) {
        if !self.initiated.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(true);
        }
    }

    /// Returns `true` once shutdown has been initiated.
    pub fn is_shutdown(&self) -> bool {
        self.initiated.load(Ordering::Acquire)
    }

    /// Resolves when shutdown is triggered. Immediately ready if it already was.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // wait_for checks the current value first, so a signal sent before
        // this call is not missed.
        let _ = rx.wait_for(|initiated| *initiated).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
