//! Cart synchronizer.
//!
//! Presents the live state of the user's cart and keeps it consistent with
//! the backend despite optimistic local edits. Every user action applies
//! locally first (the UI reflects intent immediately) and issues exactly
//! one PATCH; the response reconciles local state with server truth, and a
//! failed request rolls the optimistic edit back instead of leaving the
//! two sides silently diverged.
//!
//! A generation counter orders local mutations against in-flight network
//! responses: a wholesale refresh that raced with a user edit is discarded,
//! and a reconcile/rollback for a superseded action is ignored.

use std::sync::Mutex;

use serde::Serialize;
use tracing::{debug, warn};

use crate::api::{ApiClient, CartReply};
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::models::{CartEntry, MenuItem};

/// Wire payload of `PATCH /carts`. Quantity 0 means removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CartUpdate {
    pub menu_id: i64,
    pub quantity: i64,
}

/// An optimistic mutation that has been applied locally but not yet
/// confirmed. Carries the request payload and everything needed to undo
/// the edit if the backend rejects it.
#[derive(Debug)]
pub struct PendingUpdate {
    pub payload: CartUpdate,
    generation: u64,
    rollback: Vec<CartEntry>,
}

// ---------------------------------------------------------------------------
// Pure state
// ---------------------------------------------------------------------------

/// In-memory cart state. Pure: all network effects live in
/// [`CartSynchronizer`], which makes the synchronization contract testable
/// without a backend.
#[derive(Debug, Default)]
pub struct CartState {
    entries: Vec<CartEntry>,
    /// Bumped on every local mutation; network completions compare against
    /// it to detect that they have been superseded.
    generation: u64,
}

impl CartState {
    pub fn entries(&self) -> &[CartEntry] {
        &self.entries
    }

    pub fn total(&self) -> i64 {
        self.entries.iter().map(|e| e.subtotal).sum()
    }

    pub fn quantity_of(&self, menu_id: i64) -> Option<i64> {
        self.entries
            .iter()
            .find(|e| e.menu_id == menu_id)
            .map(|e| e.quantity)
    }

    /// Mark the start of a wholesale refresh; pass the returned generation
    /// to [`CartState::finish_refresh`].
    pub fn begin_refresh(&self) -> u64 {
        self.generation
    }

    /// Replace the local list with the fetched cart, unless a local edit
    /// happened while the fetch was in flight — then the stale response is
    /// discarded and the optimistic state stands until the next poll.
    pub fn finish_refresh(&mut self, started_at: u64, mut server: Vec<CartEntry>) -> bool {
        if self.generation != started_at {
            debug!(
                started_at,
                generation = self.generation,
                "discarding stale cart refresh"
            );
            return false;
        }
        for entry in &mut server {
            entry.recompute_subtotal();
        }
        self.entries = server;
        true
    }

    /// Add one unit of `item`: a new entry on first add, otherwise an
    /// increment of the existing one.
    pub fn add_item(&mut self, item: &MenuItem) -> PendingUpdate {
        let quantity = self.quantity_of(item.id).unwrap_or(0) + 1;
        let rollback = self.entries.clone();
        self.upsert(item.id, &item.name, item.price, quantity);
        self.generation += 1;
        PendingUpdate {
            payload: CartUpdate {
                menu_id: item.id,
                quantity,
            },
            generation: self.generation,
            rollback,
        }
    }

    /// Set the quantity of an existing entry. Quantity 0 removes the entry
    /// from local state immediately; the request still goes out so the
    /// backend drops it too.
    pub fn set_quantity(&mut self, menu_id: i64, quantity: i64) -> Result<PendingUpdate> {
        let Some(pos) = self.entries.iter().position(|e| e.menu_id == menu_id) else {
            return Err(ClientError::CartEntryMissing { menu_id });
        };
        let rollback = self.entries.clone();

        if quantity <= 0 {
            self.entries.remove(pos);
        } else {
            let entry = &mut self.entries[pos];
            entry.quantity = quantity;
            entry.recompute_subtotal();
        }
        self.generation += 1;

        Ok(PendingUpdate {
            payload: CartUpdate {
                menu_id,
                quantity: quantity.max(0),
            },
            generation: self.generation,
            rollback,
        })
    }

    /// One more of an existing entry.
    pub fn increment(&mut self, menu_id: i64) -> Result<PendingUpdate> {
        let current = self
            .quantity_of(menu_id)
            .ok_or(ClientError::CartEntryMissing { menu_id })?;
        self.set_quantity(menu_id, current + 1)
    }

    /// One fewer; decrementing below 1 becomes a removal (quantity 0).
    pub fn decrement(&mut self, menu_id: i64) -> Result<PendingUpdate> {
        let current = self
            .quantity_of(menu_id)
            .ok_or(ClientError::CartEntryMissing { menu_id })?;
        self.set_quantity(menu_id, if current <= 1 { 0 } else { current - 1 })
    }

    /// Reconcile a confirmed mutation with server truth. Returns false when
    /// the pending update was superseded by a newer local mutation, in
    /// which case the reply is ignored (the newer action's own reconcile
    /// will land later).
    pub fn commit(&mut self, pending: &PendingUpdate, reply: CartReply) -> bool {
        if self.generation != pending.generation {
            debug!(
                pending = pending.generation,
                generation = self.generation,
                "ignoring reply for superseded cart update"
            );
            return false;
        }
        match reply {
            CartReply::Unchanged => {}
            CartReply::Entry(mut entry) => {
                entry.recompute_subtotal();
                let pos = self.entries.iter().position(|e| e.menu_id == entry.menu_id);
                match (pos, entry.quantity) {
                    (Some(pos), 0) => {
                        self.entries.remove(pos);
                    }
                    (Some(pos), _) => self.entries[pos] = entry,
                    (None, 0) => {}
                    (None, _) => self.entries.push(entry),
                }
            }
            CartReply::Cart(mut cart) => {
                for entry in &mut cart {
                    entry.recompute_subtotal();
                }
                self.entries = cart;
            }
        }
        true
    }

    /// Undo a rejected mutation. Skipped when a newer local mutation
    /// already replaced the state the snapshot was taken from.
    pub fn roll_back(&mut self, pending: PendingUpdate) -> bool {
        if self.generation != pending.generation {
            warn!(
                menu_id = pending.payload.menu_id,
                "cannot roll back superseded cart update"
            );
            return false;
        }
        self.entries = pending.rollback;
        self.generation += 1;
        true
    }

    /// Explicit post-order reset: drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.generation += 1;
    }

    fn upsert(&mut self, menu_id: i64, name: &str, unit_price: i64, quantity: i64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.menu_id == menu_id) {
            entry.quantity = quantity;
            entry.recompute_subtotal();
        } else {
            let mut entry = CartEntry {
                menu_id,
                name: name.to_string(),
                unit_price,
                quantity,
                subtotal: 0,
            };
            entry.recompute_subtotal();
            self.entries.push(entry);
        }
    }
}

// ---------------------------------------------------------------------------
// Network wrapper
// ---------------------------------------------------------------------------

pub struct CartSynchronizer {
    api: std::sync::Arc<ApiClient>,
    state: Mutex<CartState>,
    events: EventBus,
}

impl CartSynchronizer {
    pub fn new(api: std::sync::Arc<ApiClient>, events: EventBus) -> Self {
        Self {
            api,
            state: Mutex::new(CartState::default()),
            events,
        }
    }

    /// Fetch the full cart and replace local state, unless a user edit
    /// raced the fetch.
    pub async fn refresh(&self) -> Result<()> {
        let started_at = self.state.lock().unwrap().begin_refresh();
        let server = self.api.cart().await?;
        let applied = self.state.lock().unwrap().finish_refresh(started_at, server);
        if applied {
            self.events.emit(ClientEvent::CartChanged);
        }
        Ok(())
    }

    pub async fn add(&self, item: &MenuItem) -> Result<()> {
        let pending = self.state.lock().unwrap().add_item(item);
        self.push(pending).await
    }

    pub async fn increment(&self, menu_id: i64) -> Result<()> {
        let pending = self.state.lock().unwrap().increment(menu_id)?;
        self.push(pending).await
    }

    pub async fn decrement(&self, menu_id: i64) -> Result<()> {
        let pending = self.state.lock().unwrap().decrement(menu_id)?;
        self.push(pending).await
    }

    pub async fn set_quantity(&self, menu_id: i64, quantity: i64) -> Result<()> {
        let pending = self.state.lock().unwrap().set_quantity(menu_id, quantity)?;
        self.push(pending).await
    }

    /// Issue the single PATCH for an already-applied optimistic mutation,
    /// then reconcile or roll back.
    async fn push(&self, pending: PendingUpdate) -> Result<()> {
        self.events.emit(ClientEvent::CartChanged);

        let CartUpdate { menu_id, quantity } = pending.payload;
        match self.api.update_cart(menu_id, quantity).await {
            Ok(reply) => {
                if self.state.lock().unwrap().commit(&pending, reply) {
                    self.events.emit(ClientEvent::CartChanged);
                }
                Ok(())
            }
            Err(e) => {
                warn!(menu_id, quantity, error = %e, "cart update rejected, rolling back");
                if self.state.lock().unwrap().roll_back(pending) {
                    self.events.emit(ClientEvent::CartChanged);
                }
                Err(e)
            }
        }
    }

    /// Explicit post-order reset of the local cart (the backend already
    /// emptied its side when the order was created).
    pub fn clear_local(&self) {
        self.state.lock().unwrap().clear();
        self.events.emit(ClientEvent::CartChanged);
    }

    pub fn entries(&self) -> Vec<CartEntry> {
        self.state.lock().unwrap().entries().to_vec()
    }

    pub fn total(&self) -> i64 {
        self.state.lock().unwrap().total()
    }
}
