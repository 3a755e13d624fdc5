//! Axle Hub — brokers skill calls between a controller and remote Spoke
//! devices connected over persistent WebSocket channels.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod devices;
pub mod skills;
pub mod spokes;
pub mod state;
