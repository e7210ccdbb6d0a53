//! Enforcement failures and their HTTP rendering.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ces_auth::AuthError;
use serde_json::json;
use std::fmt;

/// Why a response was withheld. Only logged; every variant renders as the
/// same not-found body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// No `patient` or `subject` reference could be looked up.
    UnidentifiableSubject,
    /// The decision service answered with something other than a permit.
    Denied,
    /// Permitted, but an obligation removed the resource.
    Suppressed,
    ResolutionFailed(String),
    DecisionFailed(String),
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnidentifiableSubject => write!(f, "subject patient could not be determined"),
            Self::Denied => write!(f, "consent decision was not a permit"),
            Self::Suppressed => write!(f, "resource suppressed by obligation"),
            Self::ResolutionFailed(msg) => write!(f, "patient identity lookup failed: {msg}"),
            Self::DecisionFailed(msg) => write!(f, "consent decision request failed: {msg}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnforcementError {
    #[error("Consent denied: {0}")]
    ConsentDeny(DenyReason),

    #[error("Credential rejected: {0}")]
    Token(#[from] AuthError),

    #[error("Unsupported backend response: {0}")]
    UnsupportedResponse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EnforcementError {
    pub fn deny(reason: DenyReason) -> Self {
        Self::ConsentDeny(reason)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedResponse(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Taxonomy kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConsentDeny(_) => "consent_deny",
            Self::Token(_) => "token_error",
            Self::UnsupportedResponse(_) => "unsupported_response",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::ConsentDeny(_) => StatusCode::NOT_FOUND,
            Self::Token(_) => StatusCode::FORBIDDEN,
            Self::UnsupportedResponse(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> (&'static str, &'static str) {
        match self {
            Self::ConsentDeny(_) => ("resource not found", "not found"),
            Self::Token(_) => (
                "must provide valid Bearer token in the Authorization header",
                "forbidden",
            ),
            Self::UnsupportedResponse(_) => (
                "Invalid response from the backend FHIR server. Only JSON responses are supported.",
                "unsupported_response",
            ),
            Self::Internal(_) => (
                "the consent enforcement service encountered an internal error",
                "internal_error",
            ),
        }
    }
}

impl IntoResponse for EnforcementError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, error) = self.public_message();
        let body = json!({
            "message": message,
            "error": error,
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}
