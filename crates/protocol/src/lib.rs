//! Hub/Spoke wire protocol: the control-channel message envelope, skill
//! metadata, and protocol version negotiation.
//!
//! Spokes are remote devices that register skills with the Hub and execute
//! skill calls on behalf of the controller over a persistent channel.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod version;

pub use version::{negotiate, VersionError, SUPPORTED_VERSIONS};

/// Version tag carried inside `skill_request`/`skill_response` payloads.
pub const WIRE_VERSION: u8 = 1;

fn default_wire_version() -> u8 {
    WIRE_VERSION
}

/// Control-channel message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelMessage {
    /// Bidirectional: liveness probe.
    #[serde(rename = "ping")]
    Ping,

    /// Bidirectional: liveness response.
    #[serde(rename = "pong")]
    Pong,

    /// Hub → Spoke: execute a skill call.
    #[serde(rename = "skill_request")]
    SkillRequest {
        #[serde(default = "default_wire_version")]
        v: u8,
        request_id: String,
        skill_name: String,
        method_name: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        kwargs: Map<String, Value>,
    },

    /// Spoke → Hub: skill call result, correlated by `request_id`.
    #[serde(rename = "skill_response")]
    SkillResponse {
        #[serde(default = "default_wire_version")]
        v: u8,
        request_id: String,
        success: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Metadata for one callable skill, as registered by a device.
///
/// `(class_name, function_name)` is the skill's identity within a device;
/// re-registering the same pair replaces the stored metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSpec {
    pub class_name: String,
    pub function_name: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub docstring: String,
    /// True when the skill does not depend on the owning device's local
    /// environment and could run anywhere.
    #[serde(default)]
    pub device_agnostic: bool,
}

impl SkillSpec {
    /// The `Class.function` path the controller addresses this skill by.
    pub fn path(&self) -> String {
        format!("{}.{}", self.class_name, self.function_name)
    }
}
