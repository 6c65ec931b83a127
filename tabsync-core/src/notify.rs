//! Change notification for presentation code.

use std::sync::Arc;
use tokio::sync::watch;

/// Revision counter bumped after every observable state change.
///
/// Observers hold a `watch::Receiver`; dropping it unsubscribes.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: Arc<watch::Sender<u64>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn bump(&self) {
        self.tx.send_modify(|revision| *revision += 1);
    }

    pub fn revision(&self) -> u64 {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}
