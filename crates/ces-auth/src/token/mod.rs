//! Token verification.

pub mod jwt;

pub use jwt::{ConsentTokenClaims, JwtError, JwtVerifier, SigningAlgorithm};
