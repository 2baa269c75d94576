//! Order placement flow and status tracking.
//!
//! Placement converts the server-side cart into an order: submit, hold a
//! transient success indicator for a fixed dwell, then explicitly reset the
//! local cart and placement state. The reset replaces the old "reload the
//! whole page" behavior so unrelated view state survives a checkout.
//!
//! [`StatusTracker`] drives the customer-facing notifications: each poll of
//! the order list is diffed against the previous snapshot, and every order
//! whose status changed yields exactly one change record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::api::ApiClient;
use crate::cart::CartSynchronizer;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::models::{Order, OrderStatus};

/// How long the success indicator stays up before the post-order reset.
pub const SUCCESS_DWELL: Duration = Duration::from_millis(1500);

// ---------------------------------------------------------------------------
// Placement flow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum PlacementPhase {
    Idle,
    Submitting,
    Succeeded { order_id: i64 },
    Failed { message: String },
}

pub struct OrderFlow {
    api: Arc<ApiClient>,
    phase: Mutex<PlacementPhase>,
    events: EventBus,
}

impl OrderFlow {
    pub fn new(api: Arc<ApiClient>, events: EventBus) -> Self {
        Self {
            api,
            phase: Mutex::new(PlacementPhase::Idle),
            events,
        }
    }

    pub fn phase(&self) -> PlacementPhase {
        self.phase.lock().unwrap().clone()
    }

    /// Submit the current server-side cart as an order.
    ///
    /// On success the phase moves to `Succeeded`, an [`ClientEvent::OrderPlaced`]
    /// event fires, and after [`SUCCESS_DWELL`] the cart and placement state
    /// are reset. On failure the cart is left intact so the user can retry.
    pub async fn submit(&self, cart: &CartSynchronizer) -> Result<Order> {
        {
            let mut phase = self.phase.lock().unwrap();
            if *phase == PlacementPhase::Submitting {
                return Err(ClientError::SubmissionInProgress);
            }
            *phase = PlacementPhase::Submitting;
        }

        // Fresh idempotency key per user-visible submission attempt.
        let request_id = Uuid::new_v4().to_string();
        match self.api.create_order(&request_id).await {
            Ok(order) => {
                info!(order_id = order.id, total = order.total, "order placed");
                *self.phase.lock().unwrap() = PlacementPhase::Succeeded { order_id: order.id };
                self.events
                    .emit(ClientEvent::OrderPlaced { order_id: order.id });
                self.settle(cart).await;
                Ok(order)
            }
            Err(e) => {
                warn!(error = %e, "order submission failed");
                *self.phase.lock().unwrap() = PlacementPhase::Failed {
                    message: e.to_string(),
                };
                Err(e)
            }
        }
    }

    /// Hold the success indicator for the dwell period, then reset.
    pub async fn settle(&self, cart: &CartSynchronizer) {
        tokio::time::sleep(SUCCESS_DWELL).await;
        self.reset(cart);
    }

    /// Explicit post-order state reset: clears the local cart and returns
    /// the placement to idle.
    pub fn reset(&self, cart: &CartSynchronizer) {
        cart.clear_local();
        *self.phase.lock().unwrap() = PlacementPhase::Idle;
    }
}

// ---------------------------------------------------------------------------
// Status changes
// ---------------------------------------------------------------------------

/// Cancel an order: an explicit Cancelled status, never an optimistic local
/// flip. The returned order is the backend-confirmed state.
pub async fn cancel_order(api: &ApiClient, order_id: i64) -> Result<Order> {
    let order = api
        .update_order_status(order_id, OrderStatus::Cancelled)
        .await?;
    info!(order_id, status = %order.status, "order cancelled");
    Ok(order)
}

/// Admin status change; same confirmed-response contract as cancel.
pub async fn set_order_status(
    api: &ApiClient,
    order_id: i64,
    status: OrderStatus,
) -> Result<Order> {
    let order = api.update_order_status(order_id, status).await?;
    info!(order_id, status = %order.status, "order status updated");
    Ok(order)
}

/// A backend-driven status transition detected by the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub order_id: i64,
    pub status: OrderStatus,
}

/// Diffs each poll of the order list against the previous snapshot.
///
/// Only orders that existed in the previous snapshot with a different
/// status produce a change, so a fresh mount never floods the user with
/// notifications for orders they already know about. Orders that vanish
/// from the poll are silently dropped from tracking.
#[derive(Debug, Default)]
pub struct StatusTracker {
    previous: HashMap<i64, OrderStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest poll result and return every detected transition,
    /// exactly once each.
    pub fn observe(&mut self, orders: &[Order]) -> Vec<StatusChange> {
        let changes: Vec<StatusChange> = orders
            .iter()
            .filter(|order| {
                self.previous
                    .get(&order.id)
                    .is_some_and(|prev| *prev != order.status)
            })
            .map(|order| StatusChange {
                order_id: order.id,
                status: order.status,
            })
            .collect();

        self.previous = orders.iter().map(|o| (o.id, o.status)).collect();
        changes
    }

    /// Number of orders currently tracked.
    pub fn tracked(&self) -> usize {
        self.previous.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::session::SessionStore;

    fn order(id: i64, status: OrderStatus) -> Order {
        Order {
            id,
            items: vec![],
            total: 0,
            status,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn status_change_is_reported_exactly_once() {
        let mut tracker = StatusTracker::new();

        // First sight of the order: snapshot only, no notification.
        assert!(tracker.observe(&[order(12, OrderStatus::Pending)]).is_empty());

        // Pending -> Processing: one change naming the order and new status.
        let changes = tracker.observe(&[order(12, OrderStatus::Processing)]);
        assert_eq!(
            changes,
            vec![StatusChange {
                order_id: 12,
                status: OrderStatus::Processing
            }]
        );

        // Same status on the next poll: nothing new.
        assert!(tracker
            .observe(&[order(12, OrderStatus::Processing)])
            .is_empty());
    }

    #[test]
    fn unseen_orders_never_notify() {
        let mut tracker = StatusTracker::new();
        let changes = tracker.observe(&[order(3, OrderStatus::Processing)]);
        assert!(changes.is_empty());
    }

    #[test]
    fn removed_orders_are_dropped_from_tracking() {
        let mut tracker = StatusTracker::new();
        tracker.observe(&[order(1, OrderStatus::Pending), order(2, OrderStatus::Pending)]);
        assert_eq!(tracker.tracked(), 2);

        // Order 2 disappears from the poll.
        tracker.observe(&[order(1, OrderStatus::Pending)]);
        assert_eq!(tracker.tracked(), 1);

        // If it reappears later it counts as unseen again: no notification,
        // even with a different status.
        let changes = tracker.observe(&[
            order(1, OrderStatus::Pending),
            order(2, OrderStatus::Completed),
        ]);
        assert!(changes.is_empty());
    }

    #[test]
    fn multiple_transitions_in_one_poll() {
        let mut tracker = StatusTracker::new();
        tracker.observe(&[
            order(1, OrderStatus::Pending),
            order(2, OrderStatus::Pending),
            order(3, OrderStatus::Processing),
        ]);

        let mut changes = tracker.observe(&[
            order(1, OrderStatus::Processing),
            order(2, OrderStatus::Pending),
            order(3, OrderStatus::Completed),
        ]);
        changes.sort_by_key(|c| c.order_id);
        assert_eq!(
            changes,
            vec![
                StatusChange {
                    order_id: 1,
                    status: OrderStatus::Processing
                },
                StatusChange {
                    order_id: 3,
                    status: OrderStatus::Completed
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn success_indicator_dwells_then_resets() {
        let db = Arc::new(db::init_in_memory().expect("in-memory db"));
        let session = Arc::new(SessionStore::new(db));
        let api = Arc::new(ApiClient::new("http://localhost:1", session).expect("client"));
        let events = EventBus::new();
        let mut rx = events.subscribe();

        let flow = Arc::new(OrderFlow::new(api.clone(), events.clone()));
        let cart = Arc::new(CartSynchronizer::new(api, events.clone()));

        // Simulate a confirmed submission.
        *flow.phase.lock().unwrap() = PlacementPhase::Succeeded { order_id: 77 };

        let flow2 = flow.clone();
        let cart2 = cart.clone();
        let settle = tokio::spawn(async move { flow2.settle(&cart2).await });
        tokio::task::yield_now().await;

        // The success indicator is still up before the dwell elapses.
        assert_eq!(flow.phase(), PlacementPhase::Succeeded { order_id: 77 });

        tokio::time::advance(SUCCESS_DWELL).await;
        settle.await.expect("settle task");

        // After the dwell: placement idle, cart reset, views notified.
        assert_eq!(flow.phase(), PlacementPhase::Idle);
        assert!(cart.entries().is_empty());
        assert!(matches!(
            rx.try_recv().expect("cart reset event"),
            ClientEvent::CartChanged
        ));
    }

    #[tokio::test]
    async fn double_submit_is_rejected_while_in_flight() {
        let db = Arc::new(db::init_in_memory().expect("in-memory db"));
        let session = Arc::new(SessionStore::new(db));
        let api = Arc::new(ApiClient::new("http://localhost:1", session).expect("client"));
        let events = EventBus::new();
        let flow = OrderFlow::new(api.clone(), events.clone());
        let cart = CartSynchronizer::new(api, events);

        *flow.phase.lock().unwrap() = PlacementPhase::Submitting;
        let err = flow.submit(&cart).await.expect_err("should reject");
        assert!(matches!(err, ClientError::SubmissionInProgress));
    }
}
