//! Events for presentation layers.

use std::sync::{Arc, Mutex};

use futures::channel::mpsc;

use super::item::{ItemId, ItemSnapshot};

/// Something observers may want to redraw for.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// The queue gained items, lost items, or an item changed status.
    QueueChanged(Vec<ItemSnapshot>),
    /// This item is now being recognized.
    ItemActivated(ItemId),
    /// The combined text changed.
    OutputChanged(String),
    /// Every item of a submission has settled.
    BatchComplete,
    /// A submitted document was skipped because it could not be read.
    DocumentFailed { name: String, error: String },
}

/// Fan-out of [`SessionEvent`]s to any number of subscribers.
///
/// Channels are unbounded, so a slow subscriber never stalls OCR and never
/// misses an event. Subscribers which have gone away are dropped on the next
/// emit.
#[derive(Clone, Debug, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>>,
}

impl EventBus {
    /// Start receiving events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().expect("lock poisoned").push(tx);
        rx
    }

    /// Send an event to all live subscribers.
    pub fn emit(&self, event: SessionEvent) {
        let mut subscribers = self.subscribers.lock().expect("lock poisoned");
        subscribers.retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt as _;

    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus = EventBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        bus.emit(SessionEvent::BatchComplete);
        bus.emit(SessionEvent::ItemActivated(ItemId(4)));
        for rx in [&mut first, &mut second] {
            assert_eq!(rx.next().await, Some(SessionEvent::BatchComplete));
            assert_eq!(rx.next().await, Some(SessionEvent::ItemActivated(ItemId(4))));
        }
    }

    #[test]
    fn dropped_subscribers_are_forgotten() {
        let bus = EventBus::default();
        drop(bus.subscribe());
        bus.emit(SessionEvent::BatchComplete);
        assert!(bus.subscribers.lock().expect("lock poisoned").is_empty());
    }
}
