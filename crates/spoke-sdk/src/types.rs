//! Core types for skill handling: context, results, and errors.

use tokio_util::sync::CancellationToken;

/// Context provided to every skill handler invocation.
#[derive(Clone, Debug)]
pub struct SkillContext {
    /// Correlation ID, echoed back in the `skill_response`.
    pub request_id: String,
    /// Skill class name from the request (e.g. `"WeatherSkill"`).
    pub skill_name: String,
    /// Method name within the skill (e.g. `"today"`).
    pub method_name: String,
    /// Cancelled when the channel drops or the spoke shuts down.
    pub cancel: CancellationToken,
}

/// Result type for skill handlers.
pub type SkillResult = Result<serde_json::Value, SkillError>;

/// Errors a skill handler can return.
///
/// The SDK translates these into a `skill_response` with `success: false`
/// and the rendered message in the `error` field.
#[derive(thiserror::Error, Debug, Clone)]
pub enum SkillError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("{0}")]
    Failed(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
}

/// Top-level SDK error.
#[derive(thiserror::Error, Debug)]
pub enum SpokeSdkError {
    #[error("config: {0}")]
    Config(String),
    #[error("registration: {0}")]
    Registration(String),
    /// The hub no longer recognizes our device id (for example after its
    /// state directory was lost). Recoverable by registering again.
    #[error("device id not recognized by hub")]
    UnknownDevice,
    #[error("websocket: {0}")]
    WebSocket(String),
    #[error("reconnect exhausted after {0} attempts")]
    ReconnectExhausted(u32),
    #[error("shutdown")]
    Shutdown,
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
