//! Reverse proxy in front of the backend FHIR server.

pub mod error;
pub mod handler;
pub mod headers;

pub use error::ProxyError;
pub use handler::proxy_request;
