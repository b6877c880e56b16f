//! Callbacks attaching [`InfoService`] to the RPC server and the gateway.

use async_trait::async_trait;
use axum::http::Method;

use super::InfoService;
use crate::infrastructure::gateway::{GatewayMux, RegistrationError};
use crate::infrastructure::grpc::proto::FILE_DESCRIPTOR_SET;
use crate::infrastructure::grpc::proto::sample::info::v1::InfoRequest;
use crate::infrastructure::grpc::proto::sample::info::v1::info_client::InfoClient;
use crate::infrastructure::grpc::proto::sample::info::v1::info_server::InfoServer;
use crate::infrastructure::grpc::{Registrations, ServiceRegistry};
use crate::infrastructure::server::{DialOptions, HandlerRegistrations};

/// Gateway path for the `Info` RPC.
pub const INFO_PATH: &str = "/api/v1/info";

/// Registers `service` and the proto descriptors for reflection.
pub fn grpc_registrations(service: InfoService) -> impl Registrations {
    move |registry: &mut ServiceRegistry| {
        registry
            .add_service(InfoServer::new(service.clone()))
            .register_file_descriptor_set(FILE_DESCRIPTOR_SET);
    }
}

/// Gateway routes for the `Info` service.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatewayRoutes;

#[async_trait]
impl HandlerRegistrations for GatewayRoutes {
    async fn register(
        &self,
        mux: &mut GatewayMux,
        endpoint: &str,
        options: &DialOptions,
    ) -> Result<(), RegistrationError> {
        let client = InfoClient::new(options.dial(endpoint).await?);

        mux.handle(Method::GET, INFO_PATH, move |request: tonic::Request<InfoRequest>| {
            let mut client = client.clone();
            async move { client.info(request).await }
        })?;
        Ok(())
    }
}
