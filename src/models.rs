//! Domain model for the canteen storefront.
//!
//! The backend is authoritative for every entity here; these types are the
//! client-side view of them. Prices are integer currency units throughout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Menu item category. Wire names match the backend labels exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Main Course")]
    MainCourse,
    Beverage,
    Snack,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::MainCourse => write!(f, "Main Course"),
            Category::Beverage => write!(f, "Beverage"),
            Category::Snack => write!(f, "Snack"),
        }
    }
}

/// A purchasable item. Read-only for customers; admins manage these through
/// the menu CRUD endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: i64,
    pub name: String,
    pub price: i64,
    #[serde(default)]
    pub description: String,
    pub category: Category,
    #[serde(default, alias = "image")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub stock: i64,
}

/// Payload for creating a menu item (admin).
#[derive(Debug, Clone, Serialize)]
pub struct MenuDraft {
    pub name: String,
    pub price: i64,
    pub description: String,
    pub category: Category,
    pub stock: i64,
}

/// Partial update for a menu item (admin). Only set fields are sent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MenuPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock: Option<i64>,
}

// ---------------------------------------------------------------------------
// Cart
// ---------------------------------------------------------------------------

/// One line of the user's cart. Invariant: `subtotal` equals
/// `quantity * unit_price` after every local mutation; call
/// [`CartEntry::recompute_subtotal`] whenever `quantity` changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartEntry {
    pub menu_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(alias = "price")]
    pub unit_price: i64,
    pub quantity: i64,
    #[serde(default)]
    pub subtotal: i64,
}

impl CartEntry {
    pub fn recompute_subtotal(&mut self) {
        self.subtotal = self.quantity * self.unit_price;
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Backend-driven order lifecycle labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Completed and Cancelled orders never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Processing => "Processing",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        };
        write!(f, "{label}")
    }
}

/// Frozen copy of an item at order-creation time, independent of later
/// catalog edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    #[serde(default)]
    pub menu_id: i64,
    pub name: String,
    #[serde(alias = "price")]
    pub unit_price: i64,
    pub quantity: i64,
    #[serde(default)]
    pub subtotal: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default, alias = "total_price")]
    pub total: i64,
    pub status: OrderStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Sum of the item subtotals. The backend total should always match;
    /// views can compare the two to spot drift.
    pub fn computed_total(&self) -> i64 {
        self.items.iter().map(|i| i.quantity * i.unit_price).sum()
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Customer,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Customer => write!(f, "customer"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
}

/// Response shape of `POST /login` and `POST /register`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
}

// ---------------------------------------------------------------------------
// Admin aggregates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopProduct {
    pub name: String,
    #[serde(default)]
    pub quantity_sold: i64,
    #[serde(default)]
    pub revenue: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    #[serde(default)]
    pub revenue: i64,
    #[serde(default)]
    pub order_count: i64,
    #[serde(default)]
    pub pending_orders: i64,
    #[serde(default)]
    pub top_products: Vec<TopProduct>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalesPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl SalesPeriod {
    /// Value of the `period` query parameter on `GET /sales`.
    pub fn as_query(&self) -> &'static str {
        match self {
            SalesPeriod::Daily => "daily",
            SalesPeriod::Weekly => "weekly",
            SalesPeriod::Monthly => "monthly",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalesRow {
    pub label: String,
    #[serde(default)]
    pub revenue: i64,
    #[serde(default)]
    pub order_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalesReport {
    #[serde(default, alias = "sales")]
    pub rows: Vec<SalesRow>,
}

// ---------------------------------------------------------------------------
// Display formatting
// ---------------------------------------------------------------------------

/// Format an integer currency amount with dot thousands separators,
/// e.g. `10000` -> `"Rp 10.000"`.
pub fn format_currency(amount: i64) -> String {
    let negative = amount < 0;
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    if negative {
        format!("-Rp {grouped}")
    } else {
        format!("Rp {grouped}")
    }
}

/// Format a timestamp for display in order lists and dashboards.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%d %b %Y %H:%M").to_string()
}
