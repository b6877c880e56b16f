//! Service registry handed to [`Registrations`] callbacks.

use std::convert::Infallible;

use axum::http::Request;
use axum::response::IntoResponse;
use tonic::body::Body;
use tonic::server::NamedService;
use tonic::service::RoutesBuilder;
use tower::Service;

/// Collects service implementations and their descriptor sets.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    routes: RoutesBuilder,
    services: Vec<&'static str>,
    descriptor_sets: Vec<&'static [u8]>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a generated tonic service.
    pub fn add_service<S>(&mut self, service: S) -> &mut Self
    where
        S: Service<Request<Body>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Response: IntoResponse,
        S::Future: Send + 'static,
    {
        self.services.push(S::NAME);
        self.routes.add_service(service);
        self
    }

    /// Expose an encoded `FileDescriptorSet` through reflection.
    pub fn register_file_descriptor_set(&mut self, encoded: &'static [u8]) -> &mut Self {
        self.descriptor_sets.push(encoded);
        self
    }

    /// Fully qualified names of the attached services, in registration order.
    #[must_use]
    pub fn service_names(&self) -> &[&'static str] {
        &self.services
    }

    pub(crate) fn into_parts(self) -> (RoutesBuilder, Vec<&'static str>, Vec<&'static [u8]>) {
        (self.routes, self.services, self.descriptor_sets)
    }
}

/// Attaches service implementations to the RPC server.
///
/// Invoked exactly once while the server is built. Any
/// `Fn(&mut ServiceRegistry)` closure qualifies.
pub trait Registrations: Send + Sync {
    /// Add services to `registry`.
    fn register(&self, registry: &mut ServiceRegistry);
}

impl<F> Registrations for F
where
    F: Fn(&mut ServiceRegistry) + Send + Sync,
{
    fn register(&self, registry: &mut ServiceRegistry) {
        self(registry);
    }
}
