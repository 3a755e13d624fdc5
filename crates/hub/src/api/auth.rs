//! API authentication middleware.
//!
//! Principal tokens are read **once at startup** (see `bootstrap`) and only
//! their SHA-256 digests are kept. Every protected request must carry
//! `Authorization: Bearer <token>`; the matching principal's name becomes
//! the request's *owner*, available to handlers via the [`Owner`]
//! extension. With no principals configured, the server logs a warning at
//! startup and treats every caller as owner `"default"` (dev mode).

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// The authenticated principal name for this request.
#[derive(Debug, Clone)]
pub struct Owner(pub String);

/// Resolve a raw bearer token to an owner name, in constant time per
/// principal. Used by both the HTTP middleware and the WS admission check.
pub fn resolve_owner(state: &AppState, token: &str) -> Option<String> {
    if state.principals.is_empty() {
        return Some("default".to_string());
    }

    let provided_hash = Sha256::digest(token.as_bytes());
    state
        .principals
        .iter()
        .find(|p| bool::from(provided_hash.ct_eq(p.token_hash.as_slice())))
        .map(|p| p.name.clone())
}

/// Axum middleware enforcing bearer-token authentication on protected
/// routes. Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    match resolve_owner(&state, provided) {
        Some(owner) => {
            req.extensions_mut().insert(Owner(owner));
            next.run(req).await
        }
        None => (
            axum::http::StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "invalid or missing API token" })),
        )
            .into_response(),
    }
}
