use crate::token::jwt::JwtError;

/// Credential failures. Every variant surfaces to the caller as the same
/// "forbidden" response; the variant only matters for logs.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Authorization header is not a Bearer credential")]
    MalformedHeader,

    #[error("Token verification failed: {0}")]
    Jwt(#[from] JwtError),

    #[error("Token has no usable actor claim")]
    MissingActor,
}

impl AuthError {
    /// Short machine-readable reason for structured logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::MalformedHeader => "malformed_header",
            Self::Jwt(JwtError::Expired) => "expired",
            Self::Jwt(_) => "invalid_token",
            Self::MissingActor => "missing_actor",
        }
    }
}
