//! Forwards client requests to the backend and enforces consent on the way back.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use ces_core::ClinicalResponse;
use tracing::{debug, info, warn};

use super::error::ProxyError;
use super::headers::{backend_request_headers, client_response_headers};
use crate::enforcement::{EnforcementError, EnforcementOutcome, InboundRequest};
use crate::server::AppState;

/// Fallback handler for every route not served by this service itself.
pub async fn proxy_request(State(state): State<AppState>, request: Request<Body>) -> Response {
    match forward(&state, request).await {
        Ok(response) => response,
        Err(err) => {
            if let ProxyError::Upstream(message) | ProxyError::RequestBody(message) = &err {
                warn!(error = %message, "Proxy request failed");
            }
            err.into_response()
        }
    }
}

/// Backend reply, fully buffered.
struct Upstream {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Upstream {
    fn intact(self) -> Response {
        let headers = client_response_headers(&self.headers, false);
        build_response(self.status, headers, Body::from(self.body))
    }
}

async fn forward(state: &AppState, request: Request<Body>) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let enforce = parts.method == Method::GET;
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!("{}{}", state.backend_base, path_and_query);

    let body = axum::body::to_bytes(body, state.body_limit)
        .await
        .map_err(|e| ProxyError::RequestBody(e.to_string()))?;

    debug!(method = %parts.method, %target, "Forwarding request to backend");
    let reply = state
        .http_client
        .request(parts.method.clone(), &target)
        .headers(backend_request_headers(&parts.headers, enforce))
        .body(body)
        .timeout(state.backend_timeout)
        .send()
        .await?;

    let upstream = Upstream {
        status: reply.status(),
        headers: reply.headers().clone(),
        body: reply.bytes().await?,
    };
    info!(status = %upstream.status, "Backend request completed");

    if !enforce || upstream.status.is_client_error() || upstream.status.is_server_error() {
        return Ok(upstream.intact());
    }
    if upstream.body.is_empty() {
        return Ok(upstream.intact());
    }

    let parsed = parse_backend_body(&upstream)?;
    let inbound = InboundRequest {
        path: parts.uri.path(),
        authorization: parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok()),
    };

    match state.enforcer.enforce(&inbound, parsed).await? {
        EnforcementOutcome::Passthrough(_) => Ok(upstream.intact()),
        EnforcementOutcome::Enforced(enforced) => enforced_response(upstream, &enforced),
    }
}

fn parse_backend_body(upstream: &Upstream) -> Result<ClinicalResponse, EnforcementError> {
    if let Some(content_type) = upstream.headers.get(header::CONTENT_TYPE) {
        let content_type = content_type.to_str().unwrap_or_default();
        if !is_json_content_type(content_type) {
            warn!(content_type, "Backend returned a non-JSON body");
            return Err(EnforcementError::unsupported(format!(
                "backend content type '{content_type}'"
            )));
        }
    }
    ClinicalResponse::from_slice(&upstream.body).map_err(|e| {
        warn!(category = %e.category(), error = %e, "Backend body rejected");
        EnforcementError::unsupported(e.to_string())
    })
}

/// `application/json`, `+json` types such as `application/fhir+json`, and the
/// DSTU2-era `application/json+fhir`.
fn is_json_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.split_once('/') {
        Some(("application", subtype)) => subtype.split('+').any(|part| part == "json"),
        _ => false,
    }
}

fn enforced_response(
    upstream: Upstream,
    enforced: &ClinicalResponse,
) -> Result<Response, ProxyError> {
    let body = serde_json::to_vec(enforced)
        .map_err(|e| EnforcementError::internal(format!("failed to serialize response: {e}")))?;
    let mut headers = client_response_headers(&upstream.headers, true);
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/fhir+json"),
        );
    }
    Ok(build_response(upstream.status, headers, Body::from(body)))
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = body.into_response();
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_content_types() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("application/fhir+json;charset=UTF-8"));
        assert!(is_json_content_type("Application/JSON"));
        assert!(is_json_content_type("application/json+fhir; charset=UTF-8"));
        assert!(!is_json_content_type("text/json-seq"));
        assert!(!is_json_content_type("application/jsonl"));
        assert!(!is_json_content_type("application/fhir+xml"));
        assert!(!is_json_content_type("text/html; charset=utf-8"));
    }
}
