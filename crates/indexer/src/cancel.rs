use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative cancellation flag for a running scan. Clones share the flag.
#[derive(Debug, Clone)]
pub struct ScanCancel {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for ScanCancel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanCancel {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // Sender lives as long as any clone, so this only happens during teardown.
            std::future::pending::<()>().await;
        }
    }
}
