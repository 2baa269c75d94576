//! Admin dashboard data: aggregate stats and sales reports.
//!
//! These calls require an admin token. A 401 here means the stored session
//! is stale, so the session is cleared on the spot and a
//! [`ClientEvent::SessionCleared`] event sends the operator back to login
//! instead of leaving the console spinning on dead requests.

use tracing::warn;

use crate::api::ApiClient;
use crate::error::Result;
use crate::events::{ClientEvent, EventBus};
use crate::models::{DashboardStats, SalesPeriod, SalesReport};
use crate::session::SessionStore;

fn clear_session_on_auth_failure(
    err: crate::error::ClientError,
    session: &SessionStore,
    events: &EventBus,
) -> crate::error::ClientError {
    if err.is_auth_failure() {
        warn!("dashboard request rejected, clearing stored session");
        session.clear();
        events.emit(ClientEvent::SessionCleared {
            reason: "token rejected by backend".to_string(),
        });
    }
    err
}

/// Fetch `GET /dashboard` aggregates for the admin landing view.
pub async fn fetch_stats(
    api: &ApiClient,
    session: &SessionStore,
    events: &EventBus,
) -> Result<DashboardStats> {
    api.dashboard()
        .await
        .map_err(|e| clear_session_on_auth_failure(e, session, events))
}

/// Fetch the sales report for the given period.
pub async fn fetch_sales(
    api: &ApiClient,
    session: &SessionStore,
    events: &EventBus,
    period: SalesPeriod,
) -> Result<SalesReport> {
    api.sales(period)
        .await
        .map_err(|e| clear_session_on_auth_failure(e, session, events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::error::ClientError;
    use crate::models::{Role, UserProfile};
    use serial_test::serial;
    use std::sync::Arc;

    fn admin() -> UserProfile {
        UserProfile {
            id: 1,
            name: "Admin".to_string(),
            email: "admin@canteen.test".to_string(),
            role: Role::Admin,
        }
    }

    #[test]
    #[serial]
    fn auth_failure_clears_the_session_and_notifies() {
        let db = Arc::new(db::init_in_memory().expect("in-memory db"));
        let session = SessionStore::new(db);
        session.save("tok-123", &admin()).expect("save session");
        assert!(session.is_logged_in());

        let events = EventBus::new();
        let mut rx = events.subscribe();

        let err = clear_session_on_auth_failure(ClientError::Auth, &session, &events);
        assert!(err.is_auth_failure());
        assert!(!session.is_logged_in());
        assert!(matches!(
            rx.try_recv().expect("session event"),
            ClientEvent::SessionCleared { .. }
        ));
    }

    #[test]
    fn non_auth_errors_leave_the_session_alone() {
        let db = Arc::new(db::init_in_memory().expect("in-memory db"));
        let session = SessionStore::new(db);

        let events = EventBus::new();
        let mut rx = events.subscribe();

        let err = clear_session_on_auth_failure(
            ClientError::Server { status: 503 },
            &session,
            &events,
        );
        assert!(matches!(err, ClientError::Server { status: 503 }));
        assert!(rx.try_recv().is_err(), "no event for a server error");
    }
}
