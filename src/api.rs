//! Canteen backend API client.
//!
//! Authenticated HTTP communication with the canteen REST backend: auth,
//! catalog CRUD (including the multipart image upload), cart read/update,
//! order lifecycle, and the admin aggregate endpoints. Attaches the bearer
//! token from the session store to every request when one exists; the
//! backend owns which calls actually require identity.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{info, trace, warn};

use crate::db::{self, DbState};
use crate::error::{ClientError, Result};
use crate::models::{
    AuthResponse, CartEntry, DashboardStats, MenuDraft, MenuItem, MenuPatch, Order, OrderStatus,
    SalesPeriod, SalesReport,
};
use crate::session::SessionStore;

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight connectivity probe.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable overriding the configured backend URL.
pub const BASE_URL_ENV: &str = "CANTEEN_API_URL";

/// `local_settings` slot for the configured backend URL.
const SETTINGS_CATEGORY: &str = "backend";
const SETTING_BASE_URL: &str = "base_url";

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the backend URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    // Strip trailing slashes again (in case "/api/" was present)
    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Resolve the backend URL: `CANTEEN_API_URL` beats the stored setting.
pub fn resolve_base_url(db: &DbState) -> Option<String> {
    if let Ok(url) = std::env::var(BASE_URL_ENV) {
        let trimmed = url.trim();
        if !trimmed.is_empty() {
            return Some(normalize_base_url(trimmed));
        }
    }
    let conn = db.conn.lock().ok()?;
    db::get_setting(&conn, SETTINGS_CATEGORY, SETTING_BASE_URL)
        .map(|url| normalize_base_url(&url))
}

/// Persist the configured backend URL.
pub fn store_base_url(db: &DbState, url: &str) -> Result<()> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| ClientError::Storage(e.to_string()))?;
    db::set_setting(
        &conn,
        SETTINGS_CATEGORY,
        SETTING_BASE_URL,
        &normalize_base_url(url),
    )
    .map_err(ClientError::Storage)
}

// ---------------------------------------------------------------------------
// Response envelope handling
// ---------------------------------------------------------------------------

/// Some backend deployments wrap payloads in `{"data": ...}`; accept both.
fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) => match map.remove("data") {
            Some(data) => data,
            None => Value::Object(map),
        },
        other => other,
    }
}

/// Expect an array payload, tolerating an object that nests it under one of
/// `keys` (e.g. `{"menus": [...]}`).
fn expect_array(value: Value, keys: &[&str]) -> Result<Vec<Value>> {
    match value {
        Value::Array(arr) => Ok(arr),
        Value::Object(mut map) => {
            for key in keys {
                if let Some(Value::Array(arr)) = map.remove(*key) {
                    return Ok(arr);
                }
            }
            Err(ClientError::InvalidResponse(format!(
                "expected an array (or one nested under {keys:?})"
            )))
        }
        Value::Null => Ok(vec![]),
        other => Err(ClientError::InvalidResponse(format!(
            "expected an array, got {other}"
        ))),
    }
}

fn parse<T: DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| ClientError::InvalidResponse(format!("{what}: {e}")))
}

fn parse_list<T: DeserializeOwned>(value: Value, keys: &[&str], what: &str) -> Result<Vec<T>> {
    expect_array(value, keys)?
        .into_iter()
        .map(|v| parse::<T>(v, what))
        .collect()
}

// ---------------------------------------------------------------------------
// Connectivity probe
// ---------------------------------------------------------------------------

/// Result of a connectivity probe.
#[derive(Debug, serde::Serialize)]
pub struct HealthResult {
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Server reply to a cart update. The backend may return the touched entry,
/// the whole cart, or an empty body; all three are tolerated.
#[derive(Debug)]
pub enum CartReply {
    Unchanged,
    Entry(CartEntry),
    Cart(Vec<CartEntry>),
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ApiClient {
    http: Client,
    base_url: String,
    session: Arc<SessionStore>,
}

impl ApiClient {
    pub fn new(base_url: &str, session: Arc<SessionStore>) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Init(e.to_string()))?;
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url),
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform a JSON request against the backend. `path` includes the
    /// leading slash, e.g. `/carts`.
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        trace!(method = %method, path = %path, "api request");

        let mut req = self.http.request(method, &url);
        if let Some(header) = self.session.auth_header() {
            req = req.header(AUTHORIZATION, header);
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let err = ClientError::from_status(status, &body_text);
            warn!(path = %path, status = status.as_u16(), "api request failed");
            return Err(err);
        }

        if body_text.is_empty() {
            return Ok(Value::Null);
        }
        let json: Value = serde_json::from_str(&body_text)
            .map_err(|e| ClientError::InvalidResponse(format!("invalid JSON: {e}")))?;
        Ok(unwrap_envelope(json))
    }

    /// Lightweight connectivity probe with latency reporting.
    pub async fn check_health(&self) -> HealthResult {
        let url = format!("{}/health", self.base_url);
        let client = match Client::builder().timeout(CONNECTIVITY_TIMEOUT).build() {
            Ok(c) => c,
            Err(e) => {
                return HealthResult {
                    online: false,
                    latency_ms: None,
                    error: Some(format!("Failed to create HTTP client: {e}")),
                };
            }
        };

        let start = Instant::now();
        match client.get(&url).send().await {
            Ok(resp) => {
                let latency = start.elapsed().as_millis() as u64;
                if resp.status().is_success() {
                    info!(latency_ms = latency, "connectivity probe passed");
                    HealthResult {
                        online: true,
                        latency_ms: Some(latency),
                        error: None,
                    }
                } else {
                    HealthResult {
                        online: false,
                        latency_ms: Some(latency),
                        error: Some(format!("HTTP {}", resp.status().as_u16())),
                    }
                }
            }
            Err(e) => HealthResult {
                online: false,
                latency_ms: None,
                error: Some(ClientError::from_reqwest(&self.base_url, &e).to_string()),
            },
        }
    }

    // -----------------------------------------------------------------------
    // Auth
    // -----------------------------------------------------------------------

    /// `POST /login`. Returns the token and profile; persisting them is the
    /// caller's job (the session store is mutated only by the explicit
    /// login/logout operations).
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        let body = json!({ "email": email, "password": password });
        let resp = self.request(Method::POST, "/login", Some(&body)).await?;
        parse(resp, "login response")
    }

    /// `POST /register`. Same response shape as login.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<AuthResponse> {
        let body = json!({ "name": name, "email": email, "password": password });
        let resp = self.request(Method::POST, "/register", Some(&body)).await?;
        parse(resp, "register response")
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    /// `GET /menus`.
    pub async fn menus(&self) -> Result<Vec<MenuItem>> {
        let resp = self.request(Method::GET, "/menus", None).await?;
        parse_list(resp, &["menus", "items"], "menu item")
    }

    /// `POST /menus` (admin).
    pub async fn create_menu(&self, draft: &MenuDraft) -> Result<MenuItem> {
        let body =
            serde_json::to_value(draft).map_err(|e| ClientError::Storage(e.to_string()))?;
        let resp = self.request(Method::POST, "/menus", Some(&body)).await?;
        parse(resp, "created menu item")
    }

    /// `PATCH /menus/{id}` (admin).
    pub async fn update_menu(&self, id: i64, patch: &MenuPatch) -> Result<MenuItem> {
        let body =
            serde_json::to_value(patch).map_err(|e| ClientError::Storage(e.to_string()))?;
        let resp = self
            .request(Method::PATCH, &format!("/menus/{id}"), Some(&body))
            .await?;
        parse(resp, "updated menu item")
    }

    /// `DELETE /menus/{id}` (admin).
    pub async fn delete_menu(&self, id: i64) -> Result<()> {
        self.request(Method::DELETE, &format!("/menus/{id}"), None)
            .await?;
        Ok(())
    }

    /// `POST /menus/image/{id}` (admin, multipart). Returns the stored image
    /// URL when the backend reports one.
    pub async fn upload_menu_image(
        &self,
        id: i64,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Option<String>> {
        let url = format!("{}/menus/image/{id}", self.base_url);
        let mime = match filename.rsplit('.').next() {
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            _ => "application/octet-stream",
        };
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime)
            .map_err(|e| ClientError::Init(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("image", part);

        let mut req = self.http.post(&url).multipart(form);
        if let Some(header) = self.session.auth_header() {
            req = req.header(AUTHORIZATION, header);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ClientError::from_status(status, &body_text));
        }

        let image_url = serde_json::from_str::<Value>(&body_text)
            .ok()
            .map(unwrap_envelope)
            .and_then(|v| {
                v.get("image_url")
                    .or_else(|| v.get("image"))
                    .and_then(Value::as_str)
                    .map(|s| s.to_string())
            });
        Ok(image_url)
    }

    // -----------------------------------------------------------------------
    // Cart
    // -----------------------------------------------------------------------

    /// `GET /carts`.
    pub async fn cart(&self) -> Result<Vec<CartEntry>> {
        let resp = self.request(Method::GET, "/carts", None).await?;
        parse_list(resp, &["carts", "items"], "cart entry")
    }

    /// `PATCH /carts` with `{menu_id, quantity}`; quantity 0 removes the
    /// entry on the backend.
    pub async fn update_cart(&self, menu_id: i64, quantity: i64) -> Result<CartReply> {
        let body = json!({ "menu_id": menu_id, "quantity": quantity });
        let resp = self.request(Method::PATCH, "/carts", Some(&body)).await?;
        Ok(match resp {
            Value::Null => CartReply::Unchanged,
            Value::Array(arr) => CartReply::Cart(
                arr.into_iter()
                    .map(|v| parse::<CartEntry>(v, "cart entry"))
                    .collect::<Result<Vec<_>>>()?,
            ),
            obj @ Value::Object(_) => match serde_json::from_value::<CartEntry>(obj) {
                Ok(entry) => CartReply::Entry(entry),
                Err(_) => {
                    // Status-only acknowledgements carry no cart payload.
                    trace!("cart update reply carried no entry payload");
                    CartReply::Unchanged
                }
            },
            _ => CartReply::Unchanged,
        })
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// `POST /orders`: converts the server-side cart into an order. The
    /// `client_request_id` lets the backend deduplicate a retried submit.
    pub async fn create_order(&self, client_request_id: &str) -> Result<Order> {
        let body = json!({ "client_request_id": client_request_id });
        let resp = self.request(Method::POST, "/orders", Some(&body)).await?;
        parse(resp, "created order")
    }

    /// `GET /orders`.
    pub async fn orders(&self) -> Result<Vec<Order>> {
        let resp = self.request(Method::GET, "/orders", None).await?;
        parse_list(resp, &["orders"], "order")
    }

    /// `PATCH /orders/{id}` with an explicit `{"status": ...}` body. Used
    /// for both the customer cancel and the admin status change; the caller
    /// must apply only the confirmed order returned here.
    pub async fn update_order_status(&self, id: i64, status: OrderStatus) -> Result<Order> {
        let body = json!({ "status": status });
        let resp = self
            .request(Method::PATCH, &format!("/orders/{id}"), Some(&body))
            .await?;
        parse(resp, "updated order")
    }

    // -----------------------------------------------------------------------
    // Admin aggregates
    // -----------------------------------------------------------------------

    /// `GET /dashboard`.
    pub async fn dashboard(&self) -> Result<DashboardStats> {
        let resp = self.request(Method::GET, "/dashboard", None).await?;
        parse(resp, "dashboard stats")
    }

    /// `GET /sales?period=`.
    pub async fn sales(&self, period: SalesPeriod) -> Result<SalesReport> {
        let resp = self
            .request(
                Method::GET,
                &format!("/sales?period={}", period.as_query()),
                None,
            )
            .await?;
        // A bare array is a report with rows only.
        match resp {
            Value::Array(rows) => Ok(SalesReport {
                rows: rows
                    .into_iter()
                    .map(|v| parse(v, "sales row"))
                    .collect::<Result<Vec<_>>>()?,
            }),
            other => parse(other, "sales report"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn normalizes_scheme_and_trailing_segments() {
        assert_eq!(
            normalize_base_url("canteen.campus.ac.id"),
            "https://canteen.campus.ac.id"
        );
        assert_eq!(
            normalize_base_url("localhost:8080"),
            "http://localhost:8080"
        );
        assert_eq!(
            normalize_base_url("https://canteen.campus.ac.id/api/"),
            "https://canteen.campus.ac.id"
        );
        assert_eq!(
            normalize_base_url("  https://canteen.campus.ac.id///  "),
            "https://canteen.campus.ac.id"
        );
    }

    #[test]
    fn envelope_unwrapping() {
        let wrapped = json!({ "data": [1, 2, 3] });
        assert_eq!(unwrap_envelope(wrapped), json!([1, 2, 3]));

        let bare = json!([1, 2, 3]);
        assert_eq!(unwrap_envelope(bare), json!([1, 2, 3]));
    }

    #[test]
    fn array_extraction_tolerates_nesting() {
        let nested = json!({ "menus": [{ "id": 1 }] });
        let arr = expect_array(nested, &["menus"]).expect("nested array");
        assert_eq!(arr.len(), 1);

        let bare = json!([{ "id": 1 }, { "id": 2 }]);
        assert_eq!(expect_array(bare, &["menus"]).expect("bare array").len(), 2);

        assert!(expect_array(json!({ "other": 1 }), &["menus"]).is_err());
        assert!(expect_array(json!(Value::Null), &["menus"])
            .expect("null is empty")
            .is_empty());
    }

    #[test]
    #[serial]
    fn env_var_overrides_stored_base_url() {
        let db = crate::db::init_in_memory().expect("in-memory db");
        store_base_url(&db, "stored.example.com").expect("store url");

        std::env::remove_var(BASE_URL_ENV);
        assert_eq!(
            resolve_base_url(&db).as_deref(),
            Some("https://stored.example.com")
        );

        std::env::set_var(BASE_URL_ENV, "http://localhost:9000/api");
        assert_eq!(
            resolve_base_url(&db).as_deref(),
            Some("http://localhost:9000")
        );
        std::env::remove_var(BASE_URL_ENV);
    }
}
