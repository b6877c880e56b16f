//! RPC server construction and serving.

use std::time::Duration;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::service::Routes;
use tonic::transport::{Server, ServerTlsConfig};

use super::registry::{Registrations, ServiceRegistry};
use crate::infrastructure::config::GrpcSettings;
use crate::infrastructure::metrics::record_rpc;
use crate::infrastructure::server::{Listener, ServerError};
use crate::infrastructure::tls::grpc_server_tls;

/// A ready-to-serve tonic listener, not yet bound.
#[derive(Debug)]
pub struct GrpcEndpoint {
    listener: Listener,
    routes: Routes,
    services: Vec<&'static str>,
    tls: Option<ServerTlsConfig>,
    keepalive: Option<Duration>,
}

impl GrpcEndpoint {
    /// Endpoint serving `routes` in plaintext with no keepalive.
    #[must_use]
    pub fn new(listener: Listener, routes: Routes, services: Vec<&'static str>) -> Self {
        Self {
            listener,
            routes,
            services,
            tls: None,
            keepalive: None,
        }
    }

    /// Terminate TLS with `tls`.
    #[must_use]
    pub fn with_tls(mut self, tls: Option<ServerTlsConfig>) -> Self {
        self.tls = tls;
        self
    }

    /// Ping idle connections every `timeout` and drop those that stop answering.
    #[must_use]
    pub const fn with_keepalive(mut self, timeout: Option<Duration>) -> Self {
        self.keepalive = timeout;
        self
    }

    /// Which listener this endpoint backs.
    #[must_use]
    pub const fn listener(&self) -> Listener {
        self.listener
    }

    /// Fully qualified names of the services on this endpoint.
    #[must_use]
    pub fn services(&self) -> &[&'static str] {
        &self.services
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight calls.
    ///
    /// # Errors
    ///
    /// Returns the transport error if TLS setup or the accept loop fails.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), tonic::transport::Error> {
        let name = self.listener.as_str();
        let mut builder = Server::builder().trace_fn(move |req: &axum::http::Request<()>| {
            tracing::info_span!("grpc.request", listener = name, path = %req.uri().path())
        });

        if let Some(timeout) = self.keepalive {
            builder = builder
                .http2_keepalive_interval(Some(timeout))
                .http2_keepalive_timeout(Some(timeout));
        }
        if let Some(tls) = self.tls {
            builder = builder.tls_config(tls)?;
        }

        builder
            .add_routes(self.routes)
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                shutdown.cancelled_owned(),
            )
            .await
    }
}

/// Reject TLS material the transport cannot use before anything binds.
pub(crate) fn check_tls(listener: Listener, tls: &ServerTlsConfig) -> Result<(), ServerError> {
    Server::builder()
        .tls_config(tls.clone())
        .map(drop)
        .map_err(|source| ServerError::Transport { listener, source })
}

/// Build the RPC listener.
///
/// Invokes `registrations` exactly once, adds reflection for every
/// registered descriptor set, wraps the routes in the RPC statistics
/// middleware and loads the listener's TLS material.
///
/// # Errors
///
/// Returns `ServerError::Credential` if TLS material cannot be loaded,
/// `ServerError::Transport` if the transport rejects it and
/// `ServerError::Reflection` if a descriptor set is malformed.
pub fn build_grpc_server(
    settings: &GrpcSettings,
    registrations: &dyn Registrations,
) -> Result<GrpcEndpoint, ServerError> {
    let tls = grpc_server_tls(&settings.certs).map_err(|source| ServerError::Credential {
        listener: Listener::Grpc,
        source,
    })?;
    check_tls(Listener::Grpc, &tls)?;

    let mut registry = ServiceRegistry::new();
    registrations.register(&mut registry);
    let (mut routes, services, descriptor_sets) = registry.into_parts();

    if !descriptor_sets.is_empty() {
        let reflection = || {
            descriptor_sets
                .iter()
                .copied()
                .fold(tonic_reflection::server::Builder::configure(), |b, set| {
                    b.register_encoded_file_descriptor_set(set)
                })
        };
        routes.add_service(reflection().build_v1()?);
        routes.add_service(reflection().build_v1alpha()?);
    }

    let router = routes
        .routes()
        .into_axum_router()
        .layer(axum::middleware::from_fn(record_rpc));

    tracing::debug!(services = ?services, "gRPC services registered");

    Ok(GrpcEndpoint::new(Listener::Grpc, Routes::from(router), services)
        .with_tls(Some(tls))
        .with_keepalive(settings.connection_timeout()))
}
