//! Error types for the canteen client.
//!
//! Every failure surfaced to callers is a [`ClientError`]. Network failures
//! from reqwest are classified (unreachable, timeout, bad URL) and HTTP
//! status codes map to user-facing categories so views can react to an
//! expired token without string matching.

use reqwest::StatusCode;
use serde_json::Value;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot reach the canteen backend at {url}")]
    Network { url: String },

    #[error("connection to {url} timed out")]
    Timeout { url: String },

    #[error("invalid backend URL: {url}")]
    InvalidUrl { url: String },

    #[error("session token is invalid or expired")]
    Auth,

    #[error("not authorized for this operation")]
    Forbidden,

    #[error("backend endpoint not found")]
    NotFound,

    #[error("backend server error (HTTP {status})")]
    Server { status: u16 },

    #[error("{message} (HTTP {status})")]
    Http { status: u16, message: String },

    #[error("invalid response from backend: {0}")]
    InvalidResponse(String),

    #[error("failed to create HTTP client: {0}")]
    Init(String),

    #[error("local storage error: {0}")]
    Storage(String),

    #[error("cart has no entry for menu item {menu_id}")]
    CartEntryMissing { menu_id: i64 },

    #[error("an order submission is already in progress")]
    SubmissionInProgress,

    #[error("no user is logged in")]
    NotLoggedIn,
}

impl ClientError {
    /// True when the backend rejected our identity. Callers use this to
    /// clear the session and send the user back to login.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ClientError::Auth)
    }

    /// Classify a transport-level reqwest failure.
    pub(crate) fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        if err.is_connect() {
            return ClientError::Network {
                url: url.to_string(),
            };
        }
        if err.is_timeout() {
            return ClientError::Timeout {
                url: url.to_string(),
            };
        }
        if err.is_builder() {
            return ClientError::InvalidUrl {
                url: url.to_string(),
            };
        }
        ClientError::Http {
            status: 0,
            message: format!("network error communicating with {url}: {err}"),
        }
    }

    /// Map a non-success HTTP status plus the raw response body into an
    /// error. The backend's `error` / `message` JSON fields take precedence
    /// over the generic status text when present.
    pub(crate) fn from_status(status: StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => ClientError::Auth,
            403 => ClientError::Forbidden,
            404 => ClientError::NotFound,
            s if s >= 500 => ClientError::Server { status: s },
            s => ClientError::Http {
                status: s,
                message: extract_message(body)
                    .unwrap_or_else(|| "unexpected response from backend".to_string()),
            },
        }
    }
}

/// Pull a human-readable message out of an error response body.
fn extract_message(body: &str) -> Option<String> {
    let json = serde_json::from_str::<Value>(body).ok()?;
    json.get("error")
        .or_else(|| json.get("message"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_401_is_auth_failure() {
        let err = ClientError::from_status(StatusCode::UNAUTHORIZED, "");
        assert!(err.is_auth_failure());
    }

    #[test]
    fn status_500_maps_to_server_error() {
        let err = ClientError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "");
        assert!(matches!(err, ClientError::Server { status: 500 }));
    }

    #[test]
    fn body_message_wins_over_status_text() {
        let err = ClientError::from_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message": "quantity must be non-negative"}"#,
        );
        match err {
            ClientError::Http { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "quantity must be non-negative");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn garbage_body_falls_back_to_generic_message() {
        let err = ClientError::from_status(StatusCode::IM_A_TEAPOT, "<html>oops</html>");
        match err {
            ClientError::Http { status, message } => {
                assert_eq!(status, 418);
                assert_eq!(message, "unexpected response from backend");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
