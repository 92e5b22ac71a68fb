//! Typed event fan-out.
//!
//! Every observable component owns an [`EventHub`] for its own event type.
//! Observers register explicitly through [`EventHub::subscribe`] and receive
//! every event published after that point, in order. Channels are unbounded,
//! so a slow observer never causes events to be dropped.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Fan-out of events of type `E` to any number of subscribers.
#[derive(Debug)]
pub struct EventHub<E> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E: Clone> EventHub<E> {
    /// Create a hub with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a new observer.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber.
    ///
    /// Subscribers whose receiver has been dropped are pruned.
    pub fn publish(&self, event: E) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Drop every subscriber. Their receivers yield `None` once drained.
    pub fn close(&self) {
        self.subscribers.lock().clear();
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<E: Clone> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}
