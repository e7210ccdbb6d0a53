use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{Router, routing::get};
use ces_auth::{JwtContextExtractor, JwtVerifier};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::enforcement::{
    CdsDecisionService, ConsentEnforcer, FhirPatientLookup, Labeler, PassthroughLabeler,
    SlsLabeler, UnprotectedResourceTypes,
};
use crate::{handlers, proxy};

/// Shared per-process state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub enforcer: Arc<ConsentEnforcer>,
    pub http_client: reqwest::Client,
    /// Backend base URL without a trailing slash.
    pub backend_base: Arc<str>,
    pub backend_timeout: Duration,
    pub body_limit: usize,
}

impl AppState {
    /// Wire the enforcement pipeline from validated configuration.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("ces-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        let algorithm = cfg.auth.signing_algorithm().map_err(anyhow::Error::msg)?;
        let public_key = cfg
            .auth
            .jwt_public_key
            .as_deref()
            .context("auth.jwt_public_key is required")?;
        let mut verifier = JwtVerifier::from_public_pem(algorithm, public_key)
            .context("failed to load auth.jwt_public_key")?;
        if let Some(issuer) = cfg.auth.issuer.as_deref() {
            verifier = verifier.with_issuer(issuer);
        }

        let lookup = FhirPatientLookup::new(
            http_client.clone(),
            cfg.backend.base(),
            cfg.backend.timeout(),
        );

        let decision_endpoint = cfg
            .decision
            .endpoint
            .as_deref()
            .context("decision.endpoint is required")?;
        let decisions = CdsDecisionService::new(
            http_client.clone(),
            decision_endpoint,
            cfg.decision.hook.clone(),
            cfg.decision.scope.clone(),
            cfg.decision.timeout(),
        );

        tracing::info!(
            backend = %cfg.backend.base(),
            decision_hook = %decisions.hook_url(),
            labeling = cfg.labeling.enabled,
            unprotected = ?cfg.enforcement.unprotected_resource_types,
            "Consent enforcement configured"
        );

        let labeler: Arc<dyn Labeler> = if cfg.labeling.enabled {
            let endpoint = cfg
                .labeling
                .endpoint
                .as_deref()
                .context("labeling.endpoint is required when labeling is enabled")?;
            Arc::new(SlsLabeler::new(
                http_client.clone(),
                endpoint,
                cfg.labeling.timeout(),
            ))
        } else {
            tracing::warn!("Security labeling disabled; responses are enforced unlabeled");
            Arc::new(PassthroughLabeler)
        };

        let unprotected =
            UnprotectedResourceTypes::new(cfg.enforcement.unprotected_resource_types.iter().cloned());

        let enforcer = ConsentEnforcer::builder(
            Arc::new(JwtContextExtractor::new(verifier)),
            Arc::new(lookup),
            Arc::new(decisions),
        )
        .with_unprotected_types(unprotected)
        .with_backend_base(cfg.backend.base())
        .with_labeler(labeler)
        .build();

        Ok(Self {
            enforcer: Arc::new(enforcer),
            http_client,
            backend_base: Arc::from(cfg.backend.base()),
            backend_timeout: cfg.backend.timeout(),
            body_limit: cfg.server.body_limit_bytes,
        })
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        // Everything else goes to the backend
        .fallback(proxy::proxy_request)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .with_state(state)
}

pub struct CesServer {
    addr: SocketAddr,
    app: Router,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub fn build(self) -> anyhow::Result<CesServer> {
        let state = AppState::from_config(&self.config)?;
        Ok(CesServer {
            addr: self.addr,
            app: build_app(state),
        })
    }
}

impl CesServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
