//! Protocol-version negotiation middleware.
//!
//! First interceptor on the router: it runs before auth and before any
//! handler, for every request including the WebSocket upgrade. Requests
//! declaring no version pass through untouched so browsers and health
//! probes are unaffected.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

const VERSION_HEADER: &str = "x-protocol-version";
const VERSION_PARAM: &str = "protocol_version";

pub async fn negotiate_protocol_version(req: Request<Body>, next: Next) -> Response {
    let header = req
        .headers()
        .get(VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let query = req.uri().query().and_then(query_param).map(str::to_string);

    match ax_protocol::negotiate(header.as_deref(), query.as_deref()) {
        Ok(_) => next.run(req).await,
        Err(e) => (
            StatusCode::BAD_REQUEST,
            axum::Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Pull `protocol_version` out of a raw query string. Values are plain
/// version tags (`v1`), so no percent-decoding is needed.
fn query_param(query: &str) -> Option<&str> {
    query.split('&').find_map(|pair| {
        pair.split_once('=')
            .filter(|(key, _)| *key == VERSION_PARAM)
            .map(|(_, value)| value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_param_extraction() {
        assert_eq!(query_param("protocol_version=v1"), Some("v1"));
        assert_eq!(query_param("a=b&protocol_version=v2&c=d"), Some("v2"));
        assert_eq!(query_param("a=b"), None);
        assert_eq!(query_param("protocol_versionx=v1"), None);
    }
}
