//! The `relay` module is the core of the crate: it turns inbound deliveries
//! into per-device forwards.
//!
//! - `address`: broker URI, source and target address formats.
//! - `annotations`: typed extraction of the `device-id` annotation.
//! - `engine`: the receive loop and forwarding pipeline.
//! - `policy`: accept-failure and retry policies.
//! - `sink`: the outbound relay and its sender cache.

pub mod address;
pub mod annotations;
pub mod engine;
pub mod policy;
pub mod sink;

pub use engine::{LINK_CREDIT, Relay, RelayStats};
