//! `actbridge-runtime` – the goal-relay engine.
//!
//! # Modules
//!
//! - [`bridge`] – [`ActionBridge`][bridge::ActionBridge]: serves a
//!   new-protocol action on behalf of a legacy action server.  Admits one goal
//!   at a time, submits it through a
//!   [`LegacyActionClient`][actbridge_middleware::LegacyActionClient], relays
//!   feedback, maps the legacy terminal status onto the new protocol, and
//!   forwards cancellation across the protocol boundary.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises
//!   the global `tracing` subscriber with an optional OTLP span exporter.

pub mod bridge;
pub mod telemetry;

pub use bridge::{ActionBridge, BridgeConfig};
pub use telemetry::{init_tracing, TracerProviderGuard};
