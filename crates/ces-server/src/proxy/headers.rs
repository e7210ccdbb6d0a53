//! Header filtering between the client, this service and the backend.

use axum::http::HeaderMap;
use axum::http::header::{
    ACCEPT_ENCODING, AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, HeaderName,
};

/// Hop-by-hop headers (RFC 7230 section 6.1) plus `host`, which is set for
/// the target instead.
pub fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
    )
}

/// The inbound credential is for this service only.
fn is_auth_header(name: &HeaderName) -> bool {
    name == AUTHORIZATION
}

/// Headers to send to the backend.
///
/// `Accept-Encoding` is dropped when the response will be parsed, so the
/// backend answers with a plain body. `Content-Length` is recomputed by the
/// client.
pub fn backend_request_headers(incoming: &HeaderMap, parse_response: bool) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(incoming.len());
    for (name, value) in incoming {
        if is_hop_by_hop_header(name.as_str()) || is_auth_header(name) || name == CONTENT_LENGTH {
            continue;
        }
        if parse_response && name == ACCEPT_ENCODING {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Headers to return to the client.
///
/// When the body was rewritten the backend's length and encoding no longer
/// describe it.
pub fn client_response_headers(upstream: &HeaderMap, body_rewritten: bool) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if is_hop_by_hop_header(name.as_str()) {
            continue;
        }
        if body_rewritten && (name == CONTENT_LENGTH || name == CONTENT_ENCODING) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum::http::header::{ACCEPT, CONTENT_TYPE, SET_COOKIE};

    fn map(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        headers
    }

    #[test]
    fn test_is_hop_by_hop_header() {
        assert!(is_hop_by_hop_header("Connection"));
        assert!(is_hop_by_hop_header("Transfer-Encoding"));
        assert!(is_hop_by_hop_header("host"));
        assert!(!is_hop_by_hop_header("Content-Type"));
        assert!(!is_hop_by_hop_header("Authorization"));
    }

    #[test]
    fn test_authorization_never_forwarded() {
        let incoming = map(&[
            ("authorization", "Bearer secret"),
            ("accept", "application/fhir+json"),
            ("connection", "keep-alive"),
        ]);
        let forwarded = backend_request_headers(&incoming, false);
        assert!(forwarded.get(AUTHORIZATION).is_none());
        assert!(forwarded.get("connection").is_none());
        assert_eq!(forwarded.get(ACCEPT).unwrap(), "application/fhir+json");
    }

    #[test]
    fn test_accept_encoding_dropped_only_when_parsing() {
        let incoming = map(&[("accept-encoding", "gzip, br")]);
        assert!(backend_request_headers(&incoming, true).get(ACCEPT_ENCODING).is_none());
        assert!(backend_request_headers(&incoming, false).get(ACCEPT_ENCODING).is_some());
    }

    #[test]
    fn test_rewritten_response_drops_length() {
        let upstream = map(&[
            ("content-type", "application/fhir+json"),
            ("content-length", "1234"),
            ("set-cookie", "a=1"),
            ("set-cookie", "b=2"),
            ("transfer-encoding", "chunked"),
        ]);

        let rewritten = client_response_headers(&upstream, true);
        assert!(rewritten.get(CONTENT_LENGTH).is_none());
        assert!(rewritten.get("transfer-encoding").is_none());
        assert_eq!(rewritten.get(CONTENT_TYPE).unwrap(), "application/fhir+json");
        assert_eq!(rewritten.get_all(SET_COOKIE).iter().count(), 2);

        let intact = client_response_headers(&upstream, false);
        assert_eq!(intact.get(CONTENT_LENGTH).unwrap(), "1234");
    }
}
