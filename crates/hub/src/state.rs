use std::sync::Arc;

use ax_domain::config::Config;

use crate::devices::registry::DeviceRegistry;
use crate::skills::registry::SkillRegistry;
use crate::skills::router::SkillRouter;
use crate::spokes::connections::ConnectionManager;
use crate::spokes::invoker::RemoteInvoker;

/// A configured bearer-token principal, resolved and hashed at startup.
#[derive(Clone)]
pub struct Principal {
    /// Owner name devices registered with this token belong to.
    pub name: String,
    /// SHA-256 digest of the bearer token, for constant-time comparison.
    pub token_hash: Vec<u8>,
}

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Identity** — durable device registry
/// - **Connectivity** — live channels and remote invocation
/// - **Skills** — metadata registry and the search/execute router
/// - **Security** — startup-computed principal token hashes
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── Identity ──────────────────────────────────────────────────────
    pub devices: Arc<DeviceRegistry>,

    // ── Connectivity ──────────────────────────────────────────────────
    pub connections: Arc<ConnectionManager>,
    pub invoker: Arc<RemoteInvoker>,

    // ── Skills ────────────────────────────────────────────────────────
    pub skills: Arc<SkillRegistry>,
    pub router: Arc<SkillRouter>,

    // ── Security ──────────────────────────────────────────────────────
    /// Empty = dev mode (no auth enforced, owner "default").
    pub principals: Arc<Vec<Principal>>,

    pub shutdown_tx: Arc<tokio::sync::Notify>,
}
