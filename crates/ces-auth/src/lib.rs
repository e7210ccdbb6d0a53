//! Credential verification for the consent enforcement service.
//!
//! Turns the inbound `Authorization: Bearer <jwt>` header into the
//! [`ContextAttributes`](ces_core::ContextAttributes) every consent decision
//! request carries.

pub mod context;
pub mod error;
pub mod token;

pub use context::{CredentialVerifier, JwtContextExtractor, bearer_token};
pub use error::AuthError;
pub use token::jwt::{ConsentTokenClaims, JwtError, JwtVerifier, SigningAlgorithm};
