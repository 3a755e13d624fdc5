//! `ax-spoke-sdk` — Reusable SDK for building Axle spokes.
//!
//! A "spoke" is any process that registers with the Axle hub, holds a
//! persistent WebSocket channel, and executes skill calls on behalf of the
//! controller.  This crate provides the building blocks so spoke authors
//! don't need to re-implement registration, connection management,
//! heartbeats, or the request/response plumbing.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  Your Spoke (CLI / daemon / embedded)                     │
//! │                                                           │
//! │   let mut skills = SkillSet::new();                       │
//! │   skills.register(weather_spec, WeatherToday);            │
//! │                                                           │
//! │   SpokeClientBuilder::new()                               │
//! │       .hub_url("http://hub:7410")                         │
//! │       .token("secret")                                    │
//! │       .device_name("Strawberry Spoke")                    │
//! │       .identity_path("./spoke-identity.json")             │
//! │       .build()?                                           │
//! │       .run(skills, shutdown)                              │
//! │       .await;                                             │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Connection flow (hard-coded by the SDK)
//!
//! 1. `POST /v1/devices/register` — reuse the persisted device id if any;
//!    accept whatever identity the hub grants
//! 2. `POST /v1/skills/register?device_id=…` — advertise the skill set
//! 3. Connect `GET /v1/devices/ws?device_id=…&token=…`
//! 4. Main loop:
//!    - On `skill_request`: dispatch to the registered handler, always
//!      send a `skill_response`
//!    - On `ping`: reply `pong`; emit periodic `ping`s of our own
//!    - Periodic `POST /v1/skills/heartbeat?device_id=…` over HTTP
//! 5. On disconnect: reconnect with jittered exponential back-off and
//!    re-advertise skills

pub mod builder;
pub mod client;
pub mod reconnect;
pub mod skills;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::SpokeClientBuilder;
pub use client::SpokeClient;
pub use reconnect::ReconnectBackoff;
pub use skills::{SkillHandler, SkillSet};
pub use types::{SkillContext, SkillError, SkillResult, SpokeSdkError};

// Re-export protocol types so spokes never need to import ax-protocol
// directly.
pub use ax_protocol::{ChannelMessage, SkillSpec, WIRE_VERSION};
