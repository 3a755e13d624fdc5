//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};

use ax_domain::config::{AuthConfig, Config, ConfigSeverity};

use crate::devices::registry::DeviceRegistry;
use crate::skills::registry::SkillRegistry;
use crate::skills::router::SkillRouter;
use crate::spokes::connections::{ConnectionManager, Connectivity};
use crate::spokes::invoker::RemoteInvoker;
use crate::state::{AppState, Principal};

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(
    config: Arc<Config>,
    shutdown_tx: Arc<tokio::sync::Notify>,
) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Device registry ──────────────────────────────────────────────
    std::fs::create_dir_all(&config.state.path)
        .with_context(|| format!("creating state dir {}", config.state.path.display()))?;
    let devices = Arc::new(
        DeviceRegistry::load(&config.state.path).context("loading device registry")?,
    );

    // ── Connections + remote invocation ──────────────────────────────
    let connections = Arc::new(ConnectionManager::new());
    let connectivity: Arc<dyn Connectivity> = connections.clone();
    let invoker = Arc::new(RemoteInvoker::new(connectivity.clone(), &config.rpc));
    tracing::info!(
        timeout_sec = config.rpc.timeout_sec,
        "connection manager + remote invoker ready"
    );

    // ── Skill registry + router ──────────────────────────────────────
    let skills = Arc::new(SkillRegistry::new());
    let router = Arc::new(SkillRouter::new(
        devices.clone(),
        skills.clone(),
        connectivity,
        invoker.clone(),
    ));

    // ── Principals ───────────────────────────────────────────────────
    let principals = Arc::new(resolve_principals(&config.auth)?);
    if principals.is_empty() {
        tracing::warn!(
            "no API tokens configured ({} unset) — running unauthenticated, all \
             callers are owner \"default\"",
            config.auth.token_env
        );
    } else {
        tracing::info!(principals = principals.len(), "API auth enabled");
    }

    Ok(AppState {
        config,
        devices,
        connections,
        invoker,
        skills,
        router,
        principals,
        shutdown_tx,
    })
}

/// Resolve configured principals to `(name, token hash)` pairs.
///
/// Tokens come from the config literal or the named env var; with no
/// `[[auth.principals]]` entries at all, the global `token_env` var supplies
/// a single `"default"` principal. Raw tokens are hashed and dropped here.
fn resolve_principals(auth: &AuthConfig) -> anyhow::Result<Vec<Principal>> {
    let mut principals = Vec::new();

    for p in &auth.principals {
        let token = match (&p.token, &p.token_env) {
            (Some(t), _) => Some(t.clone()),
            (None, Some(var)) => match std::env::var(var) {
                Ok(t) if !t.is_empty() => Some(t),
                _ => {
                    tracing::warn!(principal = %p.name, env = %var, "token env var unset, principal disabled");
                    None
                }
            },
            (None, None) => None,
        };
        if let Some(token) = token {
            principals.push(Principal {
                name: p.name.clone(),
                token_hash: Sha256::digest(token.as_bytes()).to_vec(),
            });
        }
    }

    if principals.is_empty() {
        if let Ok(token) = std::env::var(&auth.token_env) {
            if !token.is_empty() {
                principals.push(Principal {
                    name: "default".to_string(),
                    token_hash: Sha256::digest(token.as_bytes()).to_vec(),
                });
            }
        }
    }

    Ok(principals)
}

/// Spawn the periodic loops: idle-channel sweeping and device snapshot
/// flushing. Tasks live for the process lifetime.
pub fn spawn_background_tasks(state: &AppState) {
    let connections = state.connections.clone();
    let idle_timeout = state.config.channel.idle_timeout_sec;
    let sweep_interval = state.config.channel.sweep_interval_sec;
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(sweep_interval.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            connections.prune_idle(idle_timeout);
        }
    });

    let devices = state.devices.clone();
    let flush_interval = state.config.state.flush_interval_sec;
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(flush_interval.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = devices.flush_if_dirty() {
                tracing::warn!(error = %e, "periodic device snapshot flush failed");
            }
        }
    });

    tracing::info!("background tasks spawned (idle sweep, snapshot flush)");
}
