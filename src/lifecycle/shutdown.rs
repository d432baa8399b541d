//! Shutdown fan-out for the echo binary.
//!
//! The signal handler triggers once; the accept loop and every echo task hold
//! a receiver and stop on the first message.

use tokio::sync::broadcast;

/// One-shot stop signal shared by the serving tasks.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Receiver for a task that must stop on shutdown.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Stop every subscribed task. Without subscribers this does nothing.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
