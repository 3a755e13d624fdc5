//! Builder pattern for constructing a [`SpokeClient`].

use std::path::PathBuf;
use std::time::Duration;

use crate::client::SpokeClient;
use crate::reconnect::ReconnectBackoff;
use crate::types::SpokeSdkError;

/// Fluent builder for [`SpokeClient`].
///
/// # Example
///
/// ```rust,no_run
/// # use ax_spoke_sdk::SpokeClientBuilder;
/// let client = SpokeClientBuilder::new()
///     .hub_url("http://localhost:7410")
///     .token("secret")
///     .device_name("Strawberry Spoke")
///     .identity_path("./spoke-identity.json")
///     .ping_interval(std::time::Duration::from_secs(30))
///     .max_concurrent_calls(16)
///     .build()
///     .unwrap();
/// ```
pub struct SpokeClientBuilder {
    hub_url: String,
    token: Option<String>,
    device_name: String,
    identity_path: Option<PathBuf>,
    ping_interval: Duration,
    heartbeat_interval: Duration,
    reconnect_backoff: ReconnectBackoff,
    max_concurrent_calls: usize,
}

impl SpokeClientBuilder {
    pub fn new() -> Self {
        Self {
            hub_url: "http://localhost:7410".into(),
            token: None,
            device_name: "unnamed-spoke".into(),
            identity_path: None,
            ping_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(60),
            reconnect_backoff: ReconnectBackoff::default(),
            max_concurrent_calls: 16,
        }
    }

    // ── Required ─────────────────────────────────────────────────────

    /// Set the Hub base URL (e.g. `https://hub.example.com`).
    pub fn hub_url(mut self, url: impl Into<String>) -> Self {
        self.hub_url = url.into();
        self
    }

    /// Set the bearer token used for registration and the channel.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    // ── Identity ─────────────────────────────────────────────────────

    /// Set the device's human-readable name. The Hub may grant a suffixed
    /// variant on collision.
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Persist the Hub-assigned device id to this file, so reconnects and
    /// restarts keep the same identity. Without it, every `run` registers
    /// as a brand-new device.
    pub fn identity_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_path = Some(path.into());
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    /// Override the channel ping interval (default 30s).
    pub fn ping_interval(mut self, d: Duration) -> Self {
        self.ping_interval = d;
        self
    }

    /// Override the skill heartbeat interval (default 60s).
    pub fn heartbeat_interval(mut self, d: Duration) -> Self {
        self.heartbeat_interval = d;
        self
    }

    /// Override the reconnect backoff policy.
    pub fn reconnect_backoff(mut self, cfg: ReconnectBackoff) -> Self {
        self.reconnect_backoff = cfg;
        self
    }

    /// Maximum concurrent skill executions (default 16).
    pub fn max_concurrent_calls(mut self, n: usize) -> Self {
        self.max_concurrent_calls = n;
        self
    }

    /// Build the [`SpokeClient`].
    pub fn build(self) -> Result<SpokeClient, SpokeSdkError> {
        if self.hub_url.is_empty() {
            return Err(SpokeSdkError::Config("hub_url is required".into()));
        }
        if self.device_name.trim().is_empty() {
            return Err(SpokeSdkError::Config("device_name is required".into()));
        }

        Ok(SpokeClient {
            hub_url: self.hub_url.trim_end_matches('/').to_string(),
            token: self.token,
            device_name: self.device_name,
            identity_path: self.identity_path,
            ping_interval: self.ping_interval,
            heartbeat_interval: self.heartbeat_interval,
            reconnect_backoff: self.reconnect_backoff,
            max_concurrent_calls: self.max_concurrent_calls,
            http: reqwest::Client::new(),
        })
    }
}

impl Default for SpokeClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
