//! Amp GW - control-surface gateway for networked audio amplifiers
//!
//! Keeps a live connection to the amplifier's REST API, mirrors per-channel
//! state (mute, power, volume, delay, auto-standby) into local caches, and
//! exposes that state and its mutating actions to a control surface.

pub mod api;
pub mod config;
pub mod device;
pub mod error;
pub mod orchestrator;
pub mod surface;
pub mod sync;

#[cfg(test)]
mod testing;

pub use error::{GatewayError, Result};
