use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Maximum simultaneous in-flight HTTP requests.
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Optional per-IP token-bucket rate limit. `None` disables it.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            max_concurrent_requests: d_max_concurrent(),
            cors: CorsConfig::default(),
            rate_limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins. A single `"*"` entry allows all origins.
    #[serde(default = "d_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u64,
    pub burst_size: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth principals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bearer-token principals. Each principal's `name` is the *owner* that
/// devices registered with its token belong to.
///
/// With no principals configured, the env var named by `token_env` is
/// consulted for a single `"default"` principal; if that is also unset the
/// server runs unauthenticated (dev mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub principals: Vec<PrincipalConfig>,
    #[serde(default = "d_token_env")]
    pub token_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            principals: Vec::new(),
            token_env: d_token_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalConfig {
    pub name: String,
    /// Literal token. Prefer `token_env` outside of tests.
    #[serde(default)]
    pub token: Option<String>,
    /// Env var to read the token from. Takes effect when `token` is unset.
    #[serde(default)]
    pub token_env: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State (device snapshot persistence)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "d_state_path")]
    pub path: PathBuf,
    #[serde(default = "d_30")]
    pub flush_interval_sec: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: d_state_path(),
            flush_interval_sec: 30,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Device channel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// A connection with no inbound traffic for this long is closed.
    #[serde(default = "d_120")]
    pub idle_timeout_sec: i64,
    #[serde(default = "d_30")]
    pub sweep_interval_sec: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            idle_timeout_sec: 120,
            sweep_interval_sec: 30,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RPC (remote skill calls)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "d_rpc_timeout")]
    pub timeout_sec: u64,
    /// Maximum pending calls per device (0 = unlimited).
    #[serde(default = "d_50")]
    pub max_pending_per_device: usize,
    /// Maximum pending calls globally (0 = unlimited).
    #[serde(default = "d_200")]
    pub max_pending_global: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_sec: d_rpc_timeout(),
            max_pending_per_device: 50,
            max_pending_global: 200,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// OTLP/gRPC endpoint for span export. `None` disables OpenTelemetry.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "d_service_name")]
    pub service_name: String,
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: 1.0,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Sanity-check the loaded configuration. Errors prevent startup;
    /// warnings are logged and ignored.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let error = |issues: &mut Vec<ConfigIssue>, m: String| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: m,
            })
        };

        if self.server.port == 0 {
            error(&mut issues, "server.port must be non-zero".into());
        }
        if self.rpc.timeout_sec == 0 {
            error(&mut issues, "rpc.timeout_sec must be non-zero".into());
        }
        if self.channel.idle_timeout_sec <= 0 {
            error(&mut issues, "channel.idle_timeout_sec must be positive".into());
        }
        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 || rl.burst_size == 0 {
                error(&mut issues, "server.rate_limit values must be non-zero".into());
            }
        }
        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            error(&mut issues, "observability.sample_rate must be within 0.0..=1.0".into());
        }
        for p in &self.auth.principals {
            if p.name.is_empty() {
                error(
                    &mut issues,
                    "auth.principals entries must have a non-empty name".into(),
                );
            }
            if p.token.is_none() && p.token_env.is_none() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    message: format!(
                        "auth principal {:?} has neither token nor token_env; it will never match",
                        p.name
                    ),
                });
            }
        }
        if self.rpc.timeout_sec > 600 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "rpc.timeout_sec above 600s will hold controller requests open".into(),
            });
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// serde default helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    7410
}
fn d_max_concurrent() -> usize {
    256
}
fn d_origins() -> Vec<String> {
    vec!["*".into()]
}
fn d_token_env() -> String {
    "AXLE_API_TOKEN".into()
}
fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}
fn d_service_name() -> String {
    "axle".into()
}
fn d_sample_rate() -> f64 {
    1.0
}
fn d_rpc_timeout() -> u64 {
    30
}
fn d_30() -> u64 {
    30
}
fn d_120() -> i64 {
    120
}
fn d_50() -> usize {
    50
}
fn d_200() -> usize {
    200
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 7410);
        assert_eq!(config.rpc.timeout_sec, 30);
        assert!(config.auth.principals.is_empty());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [rpc]
            timeout_sec = 5

            [[auth.principals]]
            name = "alice"
            token = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.rpc.timeout_sec, 5);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.auth.principals.len(), 1);
        assert_eq!(config.auth.principals[0].name, "alice");
    }

    #[test]
    fn validate_flags_zero_timeout() {
        let mut config = Config::default();
        config.rpc.timeout_sec = 0;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("rpc.timeout_sec")));
    }

    #[test]
    fn validate_warns_on_tokenless_principal() {
        let mut config = Config::default();
        config.auth.principals.push(PrincipalConfig {
            name: "bob".into(),
            token: None,
            token_env: None,
        });
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Warning && i.message.contains("bob")));
    }
}
