//! Device identity endpoints.

use axum::extract::State;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::auth::Owner;
use crate::spokes::connections::Connectivity;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    pub device_name: String,
    /// Previously assigned id, echoed back by a reconnecting device. Kept
    /// as a string so malformed values degrade to a fresh registration
    /// instead of a 422.
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterDeviceResponse {
    pub device_id: Uuid,
    /// Granted display name; may carry a numeric suffix on collision.
    pub display_name: String,
    pub normalized_name: String,
}

/// POST /v1/devices/register
pub async fn register_device(
    State(state): State<AppState>,
    Extension(Owner(owner)): Extension<Owner>,
    Json(req): Json<RegisterDeviceRequest>,
) -> Json<RegisterDeviceResponse> {
    let claimed = req.device_id.as_deref().and_then(|raw| {
        let parsed = Uuid::parse_str(raw).ok();
        if parsed.is_none() {
            tracing::warn!(raw = %raw, "unparseable device_id in registration, minting fresh identity");
        }
        parsed
    });

    let (device_id, display_name) = state.devices.register(&owner, &req.device_name, claimed);
    let normalized_name = ax_domain::normalize::normalize_device_name(&display_name);
    Json(RegisterDeviceResponse {
        device_id,
        display_name,
        normalized_name,
    })
}

#[derive(Debug, Serialize)]
pub struct DeviceView {
    pub device_id: Uuid,
    pub device_name: String,
    pub normalized_name: String,
    /// True while the device holds a live channel.
    pub is_active: bool,
    pub registered_at: DateTime<Utc>,
}

/// GET /v1/devices — the caller's devices, sorted by display name.
pub async fn list_devices(
    State(state): State<AppState>,
    Extension(Owner(owner)): Extension<Owner>,
) -> Json<Vec<DeviceView>> {
    let views = state
        .devices
        .devices_for_owner(&owner)
        .into_iter()
        .map(|d| DeviceView {
            device_id: d.id,
            normalized_name: d.normalized_name(),
            is_active: state.connections.is_connected(d.id),
            device_name: d.display_name,
            registered_at: d.registered_at,
        })
        .collect();
    Json(views)
}
