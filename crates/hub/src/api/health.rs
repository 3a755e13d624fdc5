use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// GET /v1/health — unauthenticated liveness probe.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "devices": state.devices.len(),
        "connected": state.connections.len(),
    }))
}
