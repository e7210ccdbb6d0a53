//! JWT verification.
//!
//! Tokens are issued by an external authorization server; this service only
//! holds its public key and checks signatures. Supported algorithms:
//!
//! - **RS256**: RSA with SHA-256 (default)
//! - **RS384**: RSA with SHA-384
//! - **ES384**: ECDSA with P-384 curve
//!
//! ## Example
//!
//! ```ignore
//! use ces_auth::token::jwt::{JwtVerifier, SigningAlgorithm};
//!
//! let verifier = JwtVerifier::from_public_pem(SigningAlgorithm::RS256, &pem)?;
//! let claims = verifier.verify(&token)?;
//! ```

use std::fmt;
use std::str::FromStr;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while verifying a JWT.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to decode a token.
    #[error("Failed to decode token: {message}")]
    DecodingError { message: String },

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token claims are invalid.
    #[error("Invalid claims: {message}")]
    InvalidClaims { message: String },

    /// Invalid key format or data.
    #[error("Invalid key: {message}")]
    InvalidKey { message: String },

    /// Unknown algorithm name in configuration.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

impl JwtError {
    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Returns `true` if the token itself was rejected (as opposed to a
    /// misconfigured key).
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::Expired
                | Self::InvalidSignature
                | Self::InvalidClaims { .. }
                | Self::DecodingError { .. }
        )
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::invalid_claims(err.to_string()),
            ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidKeyFormat => Self::invalid_key(err.to_string()),
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SigningAlgorithm {
    #[default]
    RS256,
    RS384,
    ES384,
}

impl SigningAlgorithm {
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = JwtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "ES384" => Ok(Self::ES384),
            other => Err(JwtError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

// ============================================================================
// Token Claims
// ============================================================================

/// Claims this service reads from an access token.
///
/// `actor` and `pou` are passed through to the decision service as-is, so
/// they stay untyped JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConsentTokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Expiration time (Unix timestamp), checked when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Identity of the party requesting the data.
    #[serde(default)]
    pub actor: Value,

    /// Purpose of use (e.g. `"TREAT"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pou: Option<Value>,
}

// ============================================================================
// JWT Verifier
// ============================================================================

/// Verifies tokens against one configured public key.
///
/// Thread-safe (`Send + Sync`); build once at startup and share.
pub struct JwtVerifier {
    algorithm: SigningAlgorithm,
    decoding_key: DecodingKey,
    issuer: Option<String>,
}

impl JwtVerifier {
    /// Loads the verification key from a PEM string.
    ///
    /// Literal `\n` sequences are turned into newlines so the key can be
    /// supplied through a single-line environment variable.
    ///
    /// # Errors
    /// Returns an error if the PEM data is invalid for the algorithm.
    pub fn from_public_pem(algorithm: SigningAlgorithm, pem: &str) -> Result<Self, JwtError> {
        let pem = pem.replace("\\n", "\n");
        let decoding_key = if algorithm.is_rsa() {
            DecodingKey::from_rsa_pem(pem.as_bytes())
        } else {
            DecodingKey::from_ec_pem(pem.as_bytes())
        }
        .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        Ok(Self {
            algorithm,
            decoding_key,
            issuer: None,
        })
    }

    /// Require a specific `iss` claim.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Decodes and validates a JWT string.
    ///
    /// # Errors
    /// Returns an error if the signature, expiry or issuer check fails.
    pub fn verify(&self, token: &str) -> Result<ConsentTokenClaims, JwtError> {
        let mut validation = Validation::new(self.algorithm.to_jwt_algorithm());
        // `exp` is validated when present but not required
        validation.required_spec_claims.clear();
        validation.validate_exp = true;
        validation.validate_aud = false;
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }

        let data = decode::<ConsentTokenClaims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================


#[cfg(test)]
mod tests {
    use super::test_keys::{keys, now, sign};
    use super::*;
    use serde_json::json;

    fn verifier() -> JwtVerifier {
        JwtVerifier::from_public_pem(SigningAlgorithm::RS256, &keys().public_pem).unwrap()
    }

    #[test]
    fn test_verify_reads_actor_and_pou() {
        let token = sign(&json!({
            "sub": "user-1",
            "exp": now() + 3600,
            "actor": { "system": "urn:ietf:rfc:3986", "value": "2.16.840.1.99.3.1.1" },
            "pou": "TREAT"
        }));

        let claims = verifier().verify(&token).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("user-1"));
        assert_eq!(claims.actor["value"], "2.16.840.1.99.3.1.1");
        assert_eq!(claims.pou, Some(json!("TREAT")));
    }

    #[test]
    fn test_token_without_exp_is_accepted() {
        let token = sign(&json!({ "actor": "a1" }));
        let claims = verifier().verify(&token).unwrap();
        assert_eq!(claims.actor, json!("a1"));
        assert_eq!(claims.pou, None);
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = sign(&json!({ "actor": "a1", "exp": now() - 3600 }));
        let err = verifier().verify(&token).unwrap_err();
        assert!(matches!(err, JwtError::Expired));
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_issuer_enforced_when_configured() {
        let token = sign(&json!({ "actor": "a1", "iss": "https://other" }));
        let err = verifier()
            .with_issuer("https://auth.example.com")
            .verify(&token)
            .unwrap_err();
        assert!(matches!(err, JwtError::InvalidClaims { .. }));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let err = verifier().verify("not-a-jwt").unwrap_err();
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_escaped_newlines_in_pem() {
        let escaped = keys().public_pem.replace('\n', "\\n");
        let verifier = JwtVerifier::from_public_pem(SigningAlgorithm::RS256, &escaped).unwrap();
        let token = sign(&json!({ "actor": "a1" }));
        assert!(verifier.verify(&token).is_ok());
    }

    #[test]
    fn test_invalid_pem_rejected() {
        let err = JwtVerifier::from_public_pem(SigningAlgorithm::RS256, "nope").unwrap_err();
        assert!(matches!(err, JwtError::InvalidKey { .. }));
        assert!(!err.is_validation_error());
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("rs256".parse::<SigningAlgorithm>().unwrap(), SigningAlgorithm::RS256);
        assert_eq!("ES384".parse::<SigningAlgorithm>().unwrap(), SigningAlgorithm::ES384);
        assert!("HS256".parse::<SigningAlgorithm>().is_err());
        assert!(SigningAlgorithm::RS384.is_rsa());
        assert!(!SigningAlgorithm::ES384.is_rsa());
    }
}
