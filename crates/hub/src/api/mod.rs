pub mod auth;
pub mod devices;
pub mod health;
pub mod skills;
pub mod version;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no bearer token required) and
/// **protected** (gated behind the API-token middleware). The WebSocket
/// endpoint sits in the public section because it authenticates its own
/// `token` query parameter before upgrading.
///
/// Protocol-version negotiation wraps everything, so an unsupported or
/// conflicting version declaration is rejected with a 400 before auth or
/// routing sees the request.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/v1/health", get(health::health))
        .route("/v1/devices/ws", get(crate::spokes::ws::device_ws));

    let protected = Router::new()
        // Devices
        .route("/v1/devices/register", post(devices::register_device))
        .route("/v1/devices", get(devices::list_devices))
        // Skills
        .route("/v1/skills/register", post(skills::register_skills))
        .route("/v1/skills/heartbeat", post(skills::heartbeat_skills))
        .route("/v1/skills/search", get(skills::search_skills))
        .route("/v1/skills/execute", post(skills::execute_skill))
        // Apply API auth middleware to all protected routes.
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public
        .merge(protected)
        .layer(middleware::from_fn(version::negotiate_protocol_version))
}
