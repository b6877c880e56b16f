//! Application assembly.
//!
//! Constructs the handler, both registration callbacks and the server in
//! explicit order.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::application::{GatewayRoutes, InfoService, grpc_registrations};
use crate::domain::{BuildInfo, SYSTEM_NAME};
use crate::infrastructure::config::Config;
use crate::infrastructure::metrics::HttpMetrics;
use crate::infrastructure::server::Server;

/// The assembled service.
#[derive(Debug)]
pub struct App {
    /// Process lifetime context.
    pub context: CancellationToken,
    /// Resolved configuration.
    pub config: Config,
    /// Listener orchestrator.
    pub server: Server,
}

/// Wire the service from `config` under `context`.
#[must_use]
pub fn build_app(config: Config, context: CancellationToken) -> App {
    let info = InfoService::new(BuildInfo::current());
    let server = Server::new(
        SYSTEM_NAME,
        config.api.clone(),
        Arc::new(grpc_registrations(info)),
        Arc::new(GatewayRoutes),
        HttpMetrics::global(),
        context.clone(),
    );

    App {
        context,
        config,
        server,
    }
}
