//! Session identity store.
//!
//! The single source of truth for "who is logged in": the bearer token and
//! the cached user profile. Every component reads identity through
//! [`SessionStore`]; mutation happens only via [`SessionStore::save`]
//! (login/register) and [`SessionStore::clear`] (logout or a rejected
//! token). No other code touches persistent storage for identity.
//!
//! The token lives in the OS credential store (keyring). When the keyring
//! is unavailable (headless Linux without a secret service, locked-down
//! CI) the token falls back to the sqlite `local_settings` table with a
//! warning. The profile is not a secret and is always cached in sqlite so
//! the storefront can render the navigation before the first round-trip.

use std::sync::{Arc, RwLock};

use keyring::Entry;
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::db::{self, DbState};
use crate::error::{ClientError, Result};
use crate::models::UserProfile;

const SERVICE_NAME: &str = "canteen-client";
const KEY_TOKEN: &str = "session_token";

const SETTINGS_CATEGORY: &str = "session";
const SETTING_TOKEN_FALLBACK: &str = "token_fallback";
const SETTING_PROFILE: &str = "profile";

#[derive(Clone)]
struct Session {
    token: String,
    user: UserProfile,
}

pub struct SessionStore {
    db: Arc<DbState>,
    inner: RwLock<Option<Session>>,
}

// ---------------------------------------------------------------------------
// Keyring helpers
// ---------------------------------------------------------------------------

/// Read the token from the OS keyring. Returns `None` when the entry does
/// not exist or the platform store is unavailable.
fn keyring_get() -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, KEY_TOKEN) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(error = %e, "keyring: failed to read token");
            None
        }
    }
}

/// Store the token in the OS keyring.
fn keyring_set(value: &str) -> std::result::Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, KEY_TOKEN).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    Ok(())
}

/// Delete the token from the OS keyring. Silently succeeds if the entry
/// does not exist.
fn keyring_delete() -> std::result::Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, KEY_TOKEN).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

impl SessionStore {
    pub fn new(db: Arc<DbState>) -> Self {
        Self {
            db,
            inner: RwLock::new(None),
        }
    }

    /// Restore a persisted session at startup. Absent token means
    /// logged-out; no expiry is modeled client-side, so a stale token is
    /// only detected by the first failing request.
    pub fn load(&self) -> Result<()> {
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| ClientError::Storage(e.to_string()))?;

        let token = keyring_get()
            .or_else(|| db::get_setting(&conn, SETTINGS_CATEGORY, SETTING_TOKEN_FALLBACK));
        let profile = db::get_setting(&conn, SETTINGS_CATEGORY, SETTING_PROFILE)
            .and_then(|raw| serde_json::from_str::<UserProfile>(&raw).ok());
        drop(conn);

        match (token, profile) {
            (Some(token), Some(user)) => {
                info!(user = %user.email, "session restored");
                *self.inner.write().unwrap() = Some(Session { token, user });
            }
            _ => {
                *self.inner.write().unwrap() = None;
            }
        }
        Ok(())
    }

    /// Persist a fresh identity. Called only by the login/register flows.
    pub fn save(&self, token: &str, user: &UserProfile) -> Result<()> {
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| ClientError::Storage(e.to_string()))?;

        match keyring_set(token) {
            Ok(()) => {
                // A previous fallback copy must not outlive the keyring copy.
                let _ = db::delete_setting(&conn, SETTINGS_CATEGORY, SETTING_TOKEN_FALLBACK);
            }
            Err(e) => {
                warn!(error = %e, "keyring unavailable, storing token in local settings");
                db::set_setting(&conn, SETTINGS_CATEGORY, SETTING_TOKEN_FALLBACK, token)
                    .map_err(ClientError::Storage)?;
            }
        }

        let profile_json =
            serde_json::to_string(user).map_err(|e| ClientError::Storage(e.to_string()))?;
        db::set_setting(&conn, SETTINGS_CATEGORY, SETTING_PROFILE, &profile_json)
            .map_err(ClientError::Storage)?;
        drop(conn);

        info!(user = %user.email, "session saved");
        *self.inner.write().unwrap() = Some(Session {
            token: token.to_string(),
            user: user.clone(),
        });
        Ok(())
    }

    /// Drop the identity: zeroize the in-memory token and delete every
    /// persisted copy. Used by logout and by auth-failure handling.
    pub fn clear(&self) {
        if let Some(mut session) = self.inner.write().unwrap().take() {
            session.token.zeroize();
            info!(user = %session.user.email, "session cleared");
        }

        if let Err(e) = keyring_delete() {
            warn!(error = %e, "keyring: failed to delete token");
        }
        if let Ok(conn) = self.db.conn.lock() {
            let _ = db::delete_setting(&conn, SETTINGS_CATEGORY, SETTING_TOKEN_FALLBACK);
            let _ = db::delete_setting(&conn, SETTINGS_CATEGORY, SETTING_PROFILE);
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.read().unwrap().is_some()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.inner.read().unwrap().as_ref().map(|s| s.user.clone())
    }

    /// Value of the `Authorization` header, `bearer <token>` exactly as
    /// the backend expects.
    pub fn auth_header(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .as_ref()
            .map(|s| format!("bearer {}", s.token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::Role;
    use serial_test::serial;

    fn test_store() -> SessionStore {
        let db = Arc::new(db::init_in_memory().expect("in-memory db"));
        SessionStore::new(db)
    }

    fn profile() -> UserProfile {
        UserProfile {
            id: 42,
            name: "Budi".into(),
            email: "budi@campus.test".into(),
            role: Role::Customer,
        }
    }

    #[test]
    #[serial]
    fn save_then_clear_round_trip() {
        let store = test_store();
        assert!(!store.is_logged_in());
        assert_eq!(store.auth_header(), None);

        store.save("tok-123", &profile()).expect("save session");
        assert!(store.is_logged_in());
        assert_eq!(store.auth_header().as_deref(), Some("bearer tok-123"));
        assert_eq!(store.current_user().map(|u| u.id), Some(42));

        store.clear();
        assert!(!store.is_logged_in());
        assert_eq!(store.auth_header(), None);
        assert_eq!(store.current_user(), None);
    }

    #[test]
    #[serial]
    fn load_restores_persisted_session() {
        let db = Arc::new(db::init_in_memory().expect("in-memory db"));
        let store = SessionStore::new(db.clone());
        store.save("tok-456", &profile()).expect("save session");

        // Same database, fresh in-memory state: simulates process restart.
        let restarted = SessionStore::new(db);
        restarted.load().expect("load session");
        assert!(restarted.is_logged_in());
        assert_eq!(restarted.current_user().map(|u| u.email), Some("budi@campus.test".into()));

        restarted.clear();
    }

    #[test]
    #[serial]
    fn load_without_persisted_session_is_logged_out() {
        let store = test_store();
        store.clear();
        store.load().expect("load");
        assert!(!store.is_logged_in());
    }
}
