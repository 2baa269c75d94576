//! Menu catalog: local cache, backend sync, filtering, admin CRUD.
//!
//! The catalog is read far more often than it changes, so customer views
//! render from the sqlite `menu_cache` table and a polled sync keeps it
//! fresh. Each cached payload carries a stable version digest; a sync whose
//! payload hashes to the cached version skips the write entirely.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rusqlite::params;
use serde_json::Value;
use tracing::{error, trace, warn};

use crate::api::ApiClient;
use crate::db::DbState;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::models::{Category, MenuDraft, MenuItem, MenuPatch};

const CACHE_KEY_ITEMS: &str = "items";

// ---------------------------------------------------------------------------
// Cache readers
// ---------------------------------------------------------------------------

/// Read the cached catalog. Returns an empty list on miss; rows that no
/// longer parse (schema drift) are skipped with a warning rather than
/// failing the whole read.
pub fn cached_items(db: &DbState) -> Vec<MenuItem> {
    let conn = match db.conn.lock() {
        Ok(c) => c,
        Err(e) => {
            error!("menu cache lock failed: {e}");
            return vec![];
        }
    };

    let json_str: Option<String> = conn
        .query_row(
            "SELECT data FROM menu_cache WHERE cache_key = ?1",
            params![CACHE_KEY_ITEMS],
            |row| row.get(0),
        )
        .ok();

    let Some(json_str) = json_str else {
        return vec![];
    };

    match serde_json::from_str::<Value>(&json_str) {
        Ok(Value::Array(rows)) => rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value::<MenuItem>(row) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!("skipping unparseable menu_cache row: {e}");
                    None
                }
            })
            .collect(),
        Ok(_) => {
            warn!("menu_cache[{CACHE_KEY_ITEMS}] is not an array");
            vec![]
        }
        Err(e) => {
            error!("menu_cache[{CACHE_KEY_ITEMS}] JSON parse error: {e}");
            vec![]
        }
    }
}

/// Version digest of the cached catalog, if any.
pub fn cached_version(db: &DbState) -> Option<String> {
    let conn = db.conn.lock().ok()?;
    conn.query_row(
        "SELECT version FROM menu_cache WHERE cache_key = ?1",
        params![CACHE_KEY_ITEMS],
        |row| row.get(0),
    )
    .ok()
    .flatten()
}

/// Compute a stable local version from the catalog payload itself, so
/// response timestamps never masquerade as catalog changes.
fn compute_catalog_version(items: &[MenuItem]) -> String {
    let serialized = serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string());
    let mut hasher = DefaultHasher::new();
    serialized.hash(&mut hasher);
    format!("digest:{:016x}", hasher.finish())
}

fn store_catalog(db: &DbState, items: &[MenuItem], version: &str) -> Result<()> {
    let json_str =
        serde_json::to_string(items).map_err(|e| ClientError::Storage(e.to_string()))?;
    let conn = db
        .conn
        .lock()
        .map_err(|e| ClientError::Storage(e.to_string()))?;
    conn.execute(
        "INSERT INTO menu_cache (id, cache_key, data, version, updated_at)
         VALUES (lower(hex(randomblob(16))), ?1, ?2, ?3, datetime('now'))
         ON CONFLICT(cache_key) DO UPDATE SET
            data = excluded.data,
            version = excluded.version,
            updated_at = excluded.updated_at",
        params![CACHE_KEY_ITEMS, json_str, version],
    )
    .map_err(|e| ClientError::Storage(format!("upsert menu_cache: {e}")))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Sync from the backend
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CatalogSyncOutcome {
    pub updated: bool,
    pub version: String,
    pub count: usize,
}

/// Fetch `GET /menus` and update the local cache. Skips the write (and the
/// [`ClientEvent::MenuUpdated`] event) when the payload version matches the
/// cache.
pub async fn sync_catalog(
    api: &ApiClient,
    db: &DbState,
    events: &EventBus,
) -> Result<CatalogSyncOutcome> {
    let items = api.menus().await?;
    let version = compute_catalog_version(&items);

    if cached_version(db).as_deref() == Some(version.as_str()) {
        trace!(version = %version, count = items.len(), "catalog already at latest version");
        return Ok(CatalogSyncOutcome {
            updated: false,
            version,
            count: items.len(),
        });
    }

    store_catalog(db, &items, &version)?;
    trace!(version = %version, count = items.len(), "catalog cache updated");
    events.emit(ClientEvent::MenuUpdated {
        version: version.clone(),
    });

    Ok(CatalogSyncOutcome {
        updated: true,
        version,
        count: items.len(),
    })
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

/// Filter the catalog by category and/or a case-insensitive search over
/// name and description. Pure; views call it on every keystroke.
pub fn filter_items(
    items: &[MenuItem],
    category: Option<Category>,
    search: &str,
) -> Vec<MenuItem> {
    let needle = search.trim().to_lowercase();
    items
        .iter()
        .filter(|item| category.map_or(true, |c| item.category == c))
        .filter(|item| {
            needle.is_empty()
                || item.name.to_lowercase().contains(&needle)
                || item.description.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Admin CRUD
// ---------------------------------------------------------------------------

/// After any successful mutation the catalog is refetched rather than
/// locally patched, so the cache always reflects server truth. A failed
/// refetch is logged; the next poll repairs it.
async fn refetch_after_mutation(api: &ApiClient, db: &DbState, events: &EventBus) {
    if let Err(e) = sync_catalog(api, db, events).await {
        warn!(error = %e, "catalog refetch after mutation failed");
    }
}

pub async fn create_item(
    api: &ApiClient,
    db: &DbState,
    events: &EventBus,
    draft: &MenuDraft,
) -> Result<MenuItem> {
    let item = api.create_menu(draft).await?;
    refetch_after_mutation(api, db, events).await;
    Ok(item)
}

pub async fn update_item(
    api: &ApiClient,
    db: &DbState,
    events: &EventBus,
    id: i64,
    patch: &MenuPatch,
) -> Result<MenuItem> {
    let item = api.update_menu(id, patch).await?;
    refetch_after_mutation(api, db, events).await;
    Ok(item)
}

pub async fn delete_item(
    api: &ApiClient,
    db: &DbState,
    events: &EventBus,
    id: i64,
) -> Result<()> {
    api.delete_menu(id).await?;
    refetch_after_mutation(api, db, events).await;
    Ok(())
}

pub async fn upload_image(
    api: &ApiClient,
    db: &DbState,
    events: &EventBus,
    id: i64,
    filename: &str,
    bytes: Vec<u8>,
) -> Result<Option<String>> {
    let url = api.upload_menu_image(id, filename, bytes).await?;
    refetch_after_mutation(api, db, events).await;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn item(id: i64, name: &str, category: Category, price: i64) -> MenuItem {
        MenuItem {
            id,
            name: name.to_string(),
            price,
            description: format!("{name} from the canteen"),
            category,
            image_url: None,
            stock: 5,
        }
    }

    fn catalog() -> Vec<MenuItem> {
        vec![
            item(1, "Nasi Goreng", Category::MainCourse, 15_000),
            item(2, "Es Teh Manis", Category::Beverage, 5_000),
            item(3, "Pisang Goreng", Category::Snack, 8_000),
        ]
    }

    #[test]
    fn cache_roundtrip() {
        let db = db::init_in_memory().expect("in-memory db");
        assert!(cached_items(&db).is_empty());
        assert_eq!(cached_version(&db), None);

        let items = catalog();
        let version = compute_catalog_version(&items);
        store_catalog(&db, &items, &version).expect("store");

        assert_eq!(cached_items(&db), items);
        assert_eq!(cached_version(&db), Some(version));
    }

    #[test]
    fn version_digest_is_stable_and_content_sensitive() {
        let items = catalog();
        assert_eq!(
            compute_catalog_version(&items),
            compute_catalog_version(&items)
        );

        let mut changed = catalog();
        changed[0].price = 16_000;
        assert_ne!(
            compute_catalog_version(&items),
            compute_catalog_version(&changed)
        );
    }

    #[test]
    fn store_is_an_upsert() {
        let db = db::init_in_memory().expect("in-memory db");
        let first = catalog();
        store_catalog(&db, &first, "v1").expect("store v1");

        let second = vec![item(9, "Bakso", Category::MainCourse, 12_000)];
        store_catalog(&db, &second, "v2").expect("store v2");

        assert_eq!(cached_items(&db), second);
        assert_eq!(cached_version(&db).as_deref(), Some("v2"));
    }

    #[test]
    fn filter_by_category_and_search() {
        let items = catalog();

        let mains = filter_items(&items, Some(Category::MainCourse), "");
        assert_eq!(mains.len(), 1);
        assert_eq!(mains[0].name, "Nasi Goreng");

        let goreng = filter_items(&items, None, "goreng");
        assert_eq!(goreng.len(), 2);

        let snack_goreng = filter_items(&items, Some(Category::Snack), "GORENG");
        assert_eq!(snack_goreng.len(), 1);
        assert_eq!(snack_goreng[0].name, "Pisang Goreng");

        assert!(filter_items(&items, Some(Category::Beverage), "goreng").is_empty());
        assert_eq!(filter_items(&items, None, "  ").len(), 3);
    }

    #[test]
    fn unparseable_cache_rows_are_skipped() {
        let db = db::init_in_memory().expect("in-memory db");
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO menu_cache (id, cache_key, data, version)
                 VALUES ('x', ?1, ?2, 'v1')",
                params![
                    CACHE_KEY_ITEMS,
                    r#"[{"id":1,"name":"Ok","price":100,"category":"Snack"},{"bogus":true}]"#
                ],
            )
            .expect("insert");
        }
        let items = cached_items(&db);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Ok");
    }
}
