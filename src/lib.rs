//! Client engine for a campus canteen ordering platform.
//!
//! The backend is a plain REST service; this crate is everything a
//! storefront or admin console needs between the UI and that service:
//!
//! - a typed API client with bearer-token auth ([`api`])
//! - a single session store backing every request ([`session`])
//! - a locally cached, poll-refreshed menu catalog ([`menu`])
//! - a cart synchronizer with optimistic updates that reconcile against
//!   server replies or roll back ([`cart`])
//! - order placement with a success dwell and explicit state reset, plus
//!   order-status change detection ([`orders`])
//! - a shared poll scheduler so any number of views watching a resource
//!   cost one background loop ([`scheduler`])
//!
//! [`CanteenClient`] wires all of it together.

pub mod api;
pub mod cart;
pub mod client;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod events;
pub mod menu;
pub mod models;
pub mod orders;
pub mod scheduler;
pub mod session;

pub use api::{ApiClient, CartReply, HealthResult};
pub use cart::CartSynchronizer;
pub use client::CanteenClient;
pub use error::{ClientError, Result};
pub use events::{ClientEvent, EventBus};
pub use models::{
    Category, DashboardStats, MenuDraft, MenuItem, MenuPatch, Order, OrderStatus, Role,
    SalesPeriod, SalesReport, UserProfile,
};
pub use orders::{OrderFlow, PlacementPhase, StatusChange, StatusTracker};
pub use scheduler::{PollHandle, PollResource, PollScheduler};
pub use session::SessionStore;

/// Install the global tracing subscriber. Honors `RUST_LOG`, defaulting to
/// `info`. Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
