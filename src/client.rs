//! Top-level client facade.
//!
//! [`CanteenClient`] owns the long-lived pieces (sqlite handle, session
//! store, HTTP client, cart synchronizer, order flow, poll scheduler) and
//! wires them together so a UI shell deals with one object. Session state
//! lives only in the [`SessionStore`]; every request and every view reads
//! it from there.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use crate::api::{self, ApiClient, HealthResult};
use crate::cart::CartSynchronizer;
use crate::dashboard;
use crate::db::{self, DbState};
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::menu::{self, CatalogSyncOutcome};
use crate::models::{
    Category, DashboardStats, MenuDraft, MenuItem, MenuPatch, Order, OrderStatus, SalesPeriod,
    SalesReport, UserProfile,
};
use crate::orders::{self, OrderFlow, PlacementPhase, StatusTracker};
use crate::scheduler::{PollFn, PollHandle, PollResource, PollScheduler};
use crate::session::SessionStore;

pub struct CanteenClient {
    db: Arc<DbState>,
    session: Arc<SessionStore>,
    api: Arc<ApiClient>,
    events: EventBus,
    cart: Arc<CartSynchronizer>,
    order_flow: Arc<OrderFlow>,
    tracker: Arc<Mutex<StatusTracker>>,
    scheduler: Arc<PollScheduler>,
    latest_stats: Arc<Mutex<Option<DashboardStats>>>,
}

impl CanteenClient {
    /// Open (or create) local storage under `data_dir` and connect to the
    /// backend. An explicit `base_url` is persisted for next launch; with
    /// `None` the URL comes from the environment or the stored setting.
    pub fn new(data_dir: &Path, base_url: Option<&str>) -> Result<Self> {
        let db = Arc::new(db::init(data_dir).map_err(ClientError::Storage)?);
        let base_url = match base_url {
            Some(url) => {
                api::store_base_url(&db, url)?;
                api::normalize_base_url(url)
            }
            None => api::resolve_base_url(&db)
                .ok_or_else(|| ClientError::Init("no backend URL configured".to_string()))?,
        };
        Self::assemble(db, &base_url)
    }

    fn assemble(db: Arc<DbState>, base_url: &str) -> Result<Self> {
        let session = Arc::new(SessionStore::new(Arc::clone(&db)));
        if let Err(e) = session.load() {
            warn!(error = %e, "could not restore stored session, starting logged out");
        }

        let api = Arc::new(ApiClient::new(base_url, Arc::clone(&session))?);
        let events = EventBus::new();
        let cart = Arc::new(CartSynchronizer::new(Arc::clone(&api), events.clone()));
        let order_flow = Arc::new(OrderFlow::new(Arc::clone(&api), events.clone()));
        let scheduler = PollScheduler::new(events.clone());

        info!(base_url = %api.base_url(), logged_in = session.is_logged_in(), "client ready");

        Ok(Self {
            db,
            session,
            api,
            events,
            cart,
            order_flow,
            tracker: Arc::new(Mutex::new(StatusTracker::new())),
            scheduler,
            latest_stats: Arc::new(Mutex::new(None)),
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cart(&self) -> &CartSynchronizer {
        &self.cart
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub async fn check_health(&self) -> HealthResult {
        self.api.check_health().await
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile> {
        let auth = self.api.login(email, password).await?;
        self.session.save(&auth.token, &auth.user)?;
        info!(user = %auth.user.email, role = %auth.user.role, "logged in");
        Ok(auth.user)
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<UserProfile> {
        let auth = self.api.register(name, email, password).await?;
        self.session.save(&auth.token, &auth.user)?;
        info!(user = %auth.user.email, "registered and logged in");
        Ok(auth.user)
    }

    /// Drop the session everywhere it is stored and tell views to return to
    /// login.
    pub fn logout(&self) {
        self.session.clear();
        self.events.emit(ClientEvent::SessionCleared {
            reason: "logged out".to_string(),
        });
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_logged_in()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.session.current_user()
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    /// The locally cached catalog; renders instantly, refreshed by polling.
    pub fn catalog(&self) -> Vec<MenuItem> {
        menu::cached_items(&self.db)
    }

    pub fn filter_catalog(&self, category: Option<Category>, search: &str) -> Vec<MenuItem> {
        menu::filter_items(&self.catalog(), category, search)
    }

    pub async fn sync_catalog(&self) -> Result<CatalogSyncOutcome> {
        menu::sync_catalog(&self.api, &self.db, &self.events).await
    }

    pub async fn create_menu_item(&self, draft: &MenuDraft) -> Result<MenuItem> {
        menu::create_item(&self.api, &self.db, &self.events, draft).await
    }

    pub async fn update_menu_item(&self, id: i64, patch: &MenuPatch) -> Result<MenuItem> {
        menu::update_item(&self.api, &self.db, &self.events, id, patch).await
    }

    pub async fn delete_menu_item(&self, id: i64) -> Result<()> {
        menu::delete_item(&self.api, &self.db, &self.events, id).await
    }

    pub async fn upload_menu_image(
        &self,
        id: i64,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Option<String>> {
        menu::upload_image(&self.api, &self.db, &self.events, id, filename, bytes).await
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    pub fn order_phase(&self) -> PlacementPhase {
        self.order_flow.phase()
    }

    /// Submit the current cart as an order. Requires a logged-in session
    /// (the backend's cart is per-user). See [`OrderFlow::submit`] for the
    /// success-dwell and reset behavior.
    pub async fn place_order(&self) -> Result<Order> {
        if !self.session.is_logged_in() {
            return Err(ClientError::NotLoggedIn);
        }
        self.order_flow.submit(&self.cart).await
    }

    pub async fn cancel_order(&self, order_id: i64) -> Result<Order> {
        orders::cancel_order(&self.api, order_id).await
    }

    pub async fn set_order_status(&self, order_id: i64, status: OrderStatus) -> Result<Order> {
        orders::set_order_status(&self.api, order_id, status).await
    }

    /// Fetch the order list once, diff it against the previous poll, and
    /// emit one [`ClientEvent::OrderStatusChanged`] per transition.
    pub async fn poll_orders_once(&self) -> Result<Vec<Order>> {
        poll_orders(&self.api, &self.tracker, &self.events).await
    }

    // -----------------------------------------------------------------------
    // Dashboard
    // -----------------------------------------------------------------------

    pub async fn fetch_dashboard(&self) -> Result<DashboardStats> {
        let stats = dashboard::fetch_stats(&self.api, &self.session, &self.events).await?;
        *self.latest_stats.lock().unwrap() = Some(stats.clone());
        Ok(stats)
    }

    /// The most recent dashboard snapshot, if any poll has completed.
    pub fn latest_dashboard(&self) -> Option<DashboardStats> {
        self.latest_stats.lock().unwrap().clone()
    }

    pub async fn fetch_sales(&self, period: SalesPeriod) -> Result<SalesReport> {
        dashboard::fetch_sales(&self.api, &self.session, &self.events, period).await
    }

    // -----------------------------------------------------------------------
    // Polling subscriptions
    // -----------------------------------------------------------------------

    /// Keep the catalog cache fresh while the handle is held.
    pub fn watch_catalog(&self, interval: Option<Duration>) -> PollHandle {
        let api = Arc::clone(&self.api);
        let db = Arc::clone(&self.db);
        let events = self.events.clone();
        let poll: PollFn = Arc::new(move || {
            let api = Arc::clone(&api);
            let db = Arc::clone(&db);
            let events = events.clone();
            Box::pin(async move {
                menu::sync_catalog(&api, &db, &events).await?;
                Ok(())
            })
        });
        self.scheduler.subscribe(PollResource::Catalog, interval, poll)
    }

    /// Reconcile the local cart with the server while the handle is held.
    pub fn watch_cart(&self, interval: Option<Duration>) -> PollHandle {
        let cart = Arc::clone(&self.cart);
        let poll: PollFn = Arc::new(move || {
            let cart = Arc::clone(&cart);
            Box::pin(async move { cart.refresh().await })
        });
        self.scheduler.subscribe(PollResource::Cart, interval, poll)
    }

    /// Poll the order list and emit status-change notifications while the
    /// handle is held.
    pub fn watch_orders(&self, interval: Option<Duration>) -> PollHandle {
        let api = Arc::clone(&self.api);
        let tracker = Arc::clone(&self.tracker);
        let events = self.events.clone();
        let poll: PollFn = Arc::new(move || {
            let api = Arc::clone(&api);
            let tracker = Arc::clone(&tracker);
            let events = events.clone();
            Box::pin(async move {
                poll_orders(&api, &tracker, &events).await?;
                Ok(())
            })
        });
        self.scheduler.subscribe(PollResource::Orders, interval, poll)
    }

    /// Refresh the admin dashboard snapshot while the handle is held.
    pub fn watch_dashboard(&self, interval: Option<Duration>) -> PollHandle {
        let api = Arc::clone(&self.api);
        let session = Arc::clone(&self.session);
        let events = self.events.clone();
        let slot = Arc::clone(&self.latest_stats);
        let poll: PollFn = Arc::new(move || {
            let api = Arc::clone(&api);
            let session = Arc::clone(&session);
            let events = events.clone();
            let slot = Arc::clone(&slot);
            Box::pin(async move {
                let stats = dashboard::fetch_stats(&api, &session, &events).await?;
                *slot.lock().unwrap() = Some(stats);
                Ok(())
            })
        });
        self.scheduler
            .subscribe(PollResource::Dashboard, interval, poll)
    }
}

async fn poll_orders(
    api: &ApiClient,
    tracker: &Mutex<StatusTracker>,
    events: &EventBus,
) -> Result<Vec<Order>> {
    let orders = api.orders().await?;
    let changes = tracker.lock().unwrap().observe(&orders);
    for change in changes {
        info!(order_id = change.order_id, status = %change.status, "order status changed");
        events.emit(ClientEvent::OrderStatusChanged {
            order_id: change.order_id,
            status: change.status,
        });
    }
    Ok(orders)
}
