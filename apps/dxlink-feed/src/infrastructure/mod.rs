//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer holds the DXLink WebSocket client and the process-level
//! concerns around it.

/// DXLink protocol client (codec, handshake, collector, session).
pub mod dxlink;

/// Environment configuration.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;
