#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Sample Service - Multi-protocol Service Runtime
//!
//! Runs an RPC server, an HTTP/JSON gateway in front of it and a health
//! server under one lifecycle, each terminating its own TLS.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: build metadata
//! - **Application**: the `Info` handler and its registration callbacks
//! - **Infrastructure**: config, TLS, listeners, orchestrator, metrics, telemetry
//! - **App**: explicit wiring of the above
//!
//! # Request Flow
//!
//! ```text
//! HTTP client ──► Gateway (:8383) ──► RPC (:8282) ──► InfoService
//! gRPC client ──────────────────────► RPC (:8282) ──► InfoService
//! Orchestrator ──► Health (:8484) ◄── health checks
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Domain layer - Build metadata.
pub mod domain;

/// Application layer - Handlers and registration callbacks.
pub mod application;

/// Infrastructure layer - Listeners, orchestration and ambient concerns.
pub mod infrastructure;

/// Application assembly.
pub mod app;

pub use app::{App, build_app};
pub use domain::{BuildInfo, SYSTEM_NAME};
pub use infrastructure::config::{Config, ConfigError};
pub use infrastructure::grpc::proto::sample::info::v1 as proto;
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::server::{Listener, Server, ServerError, ShutdownErrors, State};
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
