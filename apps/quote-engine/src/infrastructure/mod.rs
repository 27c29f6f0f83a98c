//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Environment configuration.
pub mod config;

/// HTTP server: probes, metrics and the query API.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Alert notification sinks.
pub mod notify;

/// Market data provider adapters (REST quotes, trade stream).
pub mod provider;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
