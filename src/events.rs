//! Client event bus.
//!
//! Components emit fire-and-forget notifications (order status changed,
//! cart changed, session cleared) that a UI shell can subscribe to. Built
//! on a broadcast channel: emission never blocks, and sending with no
//! receivers is not an error. Slow subscribers may lag and miss events.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::OrderStatus;
use crate::scheduler::PollResource;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// A previously seen order changed status; shown to the user as a
    /// one-shot notification naming the order and its new status.
    OrderStatusChanged { order_id: i64, status: OrderStatus },
    /// An order was accepted by the backend.
    OrderPlaced { order_id: i64 },
    /// The local cart state changed (optimistic apply, reconcile, rollback
    /// or reset). Views re-render from the synchronizer.
    CartChanged,
    /// The cached catalog was replaced with a newer payload.
    MenuUpdated { version: String },
    /// The session was dropped (logout or rejected token). Shells should
    /// redirect to login.
    SessionCleared { reason: String },
    /// A scheduled poll finished.
    PollCompleted { resource: PollResource, ok: bool },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. No receivers is fine.
    pub fn emit(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(ClientEvent::OrderStatusChanged {
            order_id: 3,
            status: OrderStatus::Processing,
        });

        match rx.recv().await.expect("event") {
            ClientEvent::OrderStatusChanged { order_id, status } => {
                assert_eq!(order_id, 3);
                assert_eq!(status, OrderStatus::Processing);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.emit(ClientEvent::CartChanged);
    }
}
