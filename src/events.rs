use shared_types::QueueEvent;
use tokio::sync::broadcast;

/// Where queue-state changes are published.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: QueueEvent);
}

#[derive(Clone, Debug)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<QueueEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastNotifier {
    fn publish(&self, event: QueueEvent) {
        tracing::trace!("publishing {:?}", &event);
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}
