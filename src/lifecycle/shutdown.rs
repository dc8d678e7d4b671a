//! Shutdown coordination for the edge.

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// Long-running tasks (the HTTP server, signal listeners) subscribe; one
/// `trigger` stops all of them.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once shutdown is triggered or every sender is gone.
pub async fn wait_for(mut rx: broadcast::Receiver<()>) {
    // Lagged cannot happen with a single message; Closed means nobody can
    // trigger anymore, which we treat as a shutdown as well.
    let _ = rx.recv().await;
}
