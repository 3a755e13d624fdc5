//! Shared domain types for Axle: configuration, errors, and the canonical
//! device-name normalization used on both sides of the Hub/Spoke boundary.

pub mod config;
pub mod error;
pub mod normalize;

pub use error::{Error, Result};
