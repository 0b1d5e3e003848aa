//! In-process notification that a doubt was just created.
//!
//! The creation flow publishes on a [`RefreshBus`]; every reconciler attached
//! to the bus responds with an immediate poll instead of waiting for its next
//! tick.

use edufoyer_types::DoubtId;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoubtCreated {
    /// Known when the creation call returned an id.
    pub doubt_id: Option<DoubtId>,
    pub subject: String,
}

#[derive(Debug, Clone)]
pub struct RefreshBus {
    tx: broadcast::Sender<DoubtCreated>,
}

impl Default for RefreshBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self { tx }
    }

    /// Publish a creation. Returns how many listeners were notified.
    pub fn notify_created(&self, created: DoubtCreated) -> usize {
        match self.tx.send(created) {
            Ok(listeners) => listeners,
            Err(_) => {
                tracing::debug!("Doubt created with no refresh listeners attached");
                0
            }
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DoubtCreated> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
