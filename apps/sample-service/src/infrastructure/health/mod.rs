//! gRPC Health Server
//!
//! Serves the standard `grpc.health.v1.Health` protocol (`Check`, `Watch`)
//! on its own listener. Status changes go through [`ServingStatusRegistry`],
//! which the orchestrator owns; the protocol handlers only read it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tonic::service::RoutesBuilder;
use tonic_health::pb::health_server::HealthServer;
use tonic_health::server::{HealthReporter, HealthService};

use crate::infrastructure::config::HealthSettings;
use crate::infrastructure::grpc::GrpcEndpoint;
use crate::infrastructure::grpc::server::check_tls;
use crate::infrastructure::server::{Listener, ServerError};
use crate::infrastructure::tls::grpc_server_tls;

/// Health key for a service name (`grpc.health.v1.<service>`).
#[must_use]
pub fn health_service_name(service: &str) -> String {
    format!("grpc.health.v1.{service}")
}

/// Serving status of one health key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServingStatus {
    /// Status not reported yet.
    #[default]
    Unknown,
    /// Accepting traffic.
    Serving,
    /// Not accepting traffic.
    NotServing,
}

impl ServingStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Serving => "SERVING",
            Self::NotServing => "NOT_SERVING",
        }
    }
}

impl fmt::Display for ServingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ServingStatus> for tonic_health::ServingStatus {
    fn from(status: ServingStatus) -> Self {
        match status {
            ServingStatus::Unknown => Self::Unknown,
            ServingStatus::Serving => Self::Serving,
            ServingStatus::NotServing => Self::NotServing,
        }
    }
}

/// Mutable per-service status table backing the health protocol.
///
/// Writes go to the protocol implementation, which notifies `Watch`
/// streams; a local mirror answers [`status`](Self::status) synchronously.
#[derive(Clone)]
pub struct ServingStatusRegistry {
    reporter: HealthReporter,
    statuses: Arc<RwLock<HashMap<String, ServingStatus>>>,
}

impl fmt::Debug for ServingStatusRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServingStatusRegistry")
            .field("statuses", &*self.statuses.read())
            .finish_non_exhaustive()
    }
}

impl Default for ServingStatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServingStatusRegistry {
    /// Empty registry; every key reads `Unknown`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reporter: HealthReporter::new(),
            statuses: Arc::default(),
        }
    }

    /// Set the status of `service` and notify watchers.
    pub async fn set(&self, service: &str, status: ServingStatus) {
        self.statuses.write().insert(service.to_owned(), status);
        self.reporter
            .set_service_status(service, status.into())
            .await;
        tracing::info!(service, status = %status, "Health status updated");
    }

    /// Last status set for `service`; `Unknown` if never set.
    #[must_use]
    pub fn status(&self, service: &str) -> ServingStatus {
        self.statuses
            .read()
            .get(service)
            .copied()
            .unwrap_or_default()
    }
}

/// Build the health listener serving the statuses held by `registry`.
///
/// The listener terminates TLS when `settings.certs` is set and serves
/// plaintext otherwise.
///
/// # Errors
///
/// Returns `ServerError::Credential` if configured TLS material cannot be
/// loaded and `ServerError::Transport` if the transport rejects it.
pub fn build_health_server(
    settings: &HealthSettings,
    registry: &ServingStatusRegistry,
) -> Result<GrpcEndpoint, ServerError> {
    let tls = settings
        .certs
        .as_ref()
        .map(grpc_server_tls)
        .transpose()
        .map_err(|source| ServerError::Credential {
            listener: Listener::Health,
            source,
        })?;
    if let Some(tls) = &tls {
        check_tls(Listener::Health, tls)?;
    }

    let service = HealthService::from_health_reporter(registry.reporter.clone());
    let mut routes = RoutesBuilder::default();
    routes.add_service(HealthServer::new(service));

    Ok(GrpcEndpoint::new(
        Listener::Health,
        routes.routes(),
        vec!["grpc.health.v1.Health"],
    )
    .with_tls(tls))
}
