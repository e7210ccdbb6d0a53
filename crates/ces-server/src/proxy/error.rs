use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::enforcement::EnforcementError;

/// Failures at the proxy boundary.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Backend unreachable, timed out, or its body could not be read.
    #[error("Backend request failed: {0}")]
    Upstream(String),

    #[error("Request body rejected: {0}")]
    RequestBody(String),

    #[error(transparent)]
    Enforcement(#[from] EnforcementError),
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Upstream(format!("backend timed out: {err}"))
        } else if err.is_connect() {
            Self::Upstream(format!("failed to connect to backend: {err}"))
        } else {
            Self::Upstream(err.to_string())
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, message, error) = match self {
            Self::Enforcement(err) => return err.into_response(),
            Self::Upstream(_) => (
                StatusCode::BAD_GATEWAY,
                "the backend FHIR server could not be reached",
                "bad_gateway",
            ),
            Self::RequestBody(_) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "request body could not be read or exceeds the configured limit",
                "payload_too_large",
            ),
        };
        let body = json!({
            "message": message,
            "error": error,
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}
