pub mod config;
pub mod enforcement;
pub mod handlers;
pub mod observability;
pub mod proxy;
pub mod server;

pub use config::{AppConfig, BackendConfig, ServerConfig};
pub use enforcement::{ConsentEnforcer, EnforcementError, EnforcementOutcome, InboundRequest};
pub use observability::init_tracing;
pub use server::{AppState, CesServer, ServerBuilder, build_app};
