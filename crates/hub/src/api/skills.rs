//! Skill registry and routing endpoints.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use ax_protocol::SkillSpec;

use crate::api::auth::Owner;
use crate::skills::router::SearchHit;
use crate::spokes::invoker::CallOutcome;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DeviceIdQuery {
    pub device_id: Uuid,
}

/// Look up a device and confirm it belongs to `owner`. Other principals'
/// devices are reported as not found rather than forbidden.
fn owned_device(state: &AppState, owner: &str, device_id: Uuid) -> Result<(), Response> {
    match state.devices.get(device_id) {
        Some(d) if d.owner == owner => Ok(()),
        _ => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown device id: {device_id}") })),
        )
            .into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterSkillsRequest {
    pub skills: Vec<SkillSpec>,
}

/// POST /v1/skills/register?device_id=<uuid>
pub async fn register_skills(
    State(state): State<AppState>,
    Extension(Owner(owner)): Extension<Owner>,
    Query(query): Query<DeviceIdQuery>,
    Json(req): Json<RegisterSkillsRequest>,
) -> Response {
    if let Err(resp) = owned_device(&state, &owner, query.device_id) {
        return resp;
    }
    let registered = state.skills.register(query.device_id, req.skills);
    Json(json!({ "registered": registered })).into_response()
}

/// POST /v1/skills/heartbeat?device_id=<uuid>
pub async fn heartbeat_skills(
    State(state): State<AppState>,
    Extension(Owner(owner)): Extension<Owner>,
    Query(query): Query<DeviceIdQuery>,
) -> Response {
    if let Err(resp) = owned_device(&state, &owner, query.device_id) {
        return resp;
    }
    state.connections.touch(query.device_id);
    let refreshed = state.skills.heartbeat(query.device_id);
    Json(json!({ "refreshed": refreshed })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, serde::Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total: usize,
}

/// GET /v1/skills/search?query=<text> — empty query lists everything.
pub async fn search_skills(
    State(state): State<AppState>,
    Extension(Owner(owner)): Extension<Owner>,
    Query(query): Query<SearchQuery>,
) -> Json<SearchResponse> {
    let results = state.router.search(&owner, &query.query);
    let total = results.len();
    Json(SearchResponse { results, total })
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub device_name: String,
    pub skill_name: String,
    pub method_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

/// POST /v1/skills/execute
///
/// Always 200: routing and invocation failures surface inside the body as
/// `{ "success": false, "error": ... }` so the controller can relay them.
pub async fn execute_skill(
    State(state): State<AppState>,
    Extension(Owner(owner)): Extension<Owner>,
    Json(req): Json<ExecuteRequest>,
) -> Json<CallOutcome> {
    let outcome = state
        .router
        .execute(
            &owner,
            &req.device_name,
            &req.skill_name,
            &req.method_name,
            req.args,
            req.kwargs,
        )
        .await;
    Json(outcome)
}
