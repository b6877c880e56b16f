//! Infrastructure Layer - Listeners, orchestration and ambient concerns.

/// Layered configuration.
pub mod config;

/// TLS credential loading and development certificates.
pub mod tls;

/// RPC server builder.
pub mod grpc;

/// HTTP/JSON gateway.
pub mod gateway;

/// gRPC health-check server.
pub mod health;

/// Lifecycle orchestration of the three listeners.
pub mod server;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
