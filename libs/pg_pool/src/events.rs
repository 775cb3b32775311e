use tokio::sync::broadcast;
use uuid::Uuid;

/// Events a single [`crate::connection::Connection`] emits over its lifetime.
///
/// Emission order is `Connected` exactly once, or `Error` followed by
/// `Destroyed`, or `Destroyed` alone. `Destroyed` fires exactly once
/// regardless of path.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected,
    Error(String),
    Destroyed,
}

/// Events the [`crate::pool::ConnectionPool`] emits. These are the only
/// externally observable pool signals; tests subscribe to this channel
/// instead of polling internal state.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    Started,
    Stopped,
    ConnectionCreated { id: Uuid },
    ConnectionAcquired { id: Uuid },
    ConnectionReleased { id: Uuid },
    ConnectionDestroyed { id: Uuid },
    ConnectionAborted { id: Uuid },
}

/// Thin wrapper over a broadcast sender that never fails a caller when
/// there happen to be no subscribers.
#[derive(Clone)]
pub struct EventBus<T: Clone> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Broadcasting is best-effort: a `SendError` only means nobody is
    /// currently subscribed, which is not a failure for the emitter.
    pub fn emit(&self, event: T) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_without_subscribers_does_not_panic() {
        let bus: EventBus<ConnectionEvent> = EventBus::new(4);
        bus.emit(ConnectionEvent::Connected);
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_events_in_order() {
        let bus: EventBus<PoolEvent> = EventBus::new(4);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        bus.emit(PoolEvent::ConnectionCreated { id });
        bus.emit(PoolEvent::ConnectionAcquired { id });

        match rx.recv().await.unwrap() {
            PoolEvent::ConnectionCreated { id: got } => assert_eq!(got, id),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            PoolEvent::ConnectionAcquired { id: got } => assert_eq!(got, id),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
