//! # amqp-relay
//!
//! `amqp-relay` consumes a tenant's telemetry or event stream from a
//! multi-tenant AMQP 1.0 broker and forwards every message, unchanged, to a
//! per-device sink address taken from the message's `device-id` annotation.
//!
//! ## Core Modules
//!
//! - `config`: loads settings from a file and environment variables.
//! - `relay`: the receive → extract → forward pipeline and its policies.
//! - `tls`: builds the transport-security configuration for the broker link.
//! - `transport`: the AMQP link abstractions and their `fe2o3-amqp` implementation.
//! - `utils`: error taxonomy and logging.

pub mod config;
pub mod relay;
pub mod tls;
pub mod transport;
pub mod utils;
