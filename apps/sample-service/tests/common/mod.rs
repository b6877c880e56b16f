//! Shared harness for integration tests.
//!
//! Generates certificates into a temp dir and binds every listener to an
//! ephemeral loopback port so suites can run in parallel.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sample_service::application::{GatewayRoutes, InfoService, grpc_registrations};
use sample_service::infrastructure::config::{Config, TlsCredsConfig};
use sample_service::infrastructure::metrics::HttpMetrics;
use sample_service::infrastructure::server::HandlerRegistrations;
use sample_service::infrastructure::tls::{ensure_dev_certs, gateway_as_client_tls};
use sample_service::{BuildInfo, Listener, SYSTEM_NAME, Server, build_app};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tonic::Streaming;
use tonic::transport::{Channel, Endpoint};
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::{HealthCheckRequest, HealthCheckResponse, health_check_response};

const EPHEMERAL: &str = "127.0.0.1:0";

/// Config and certificates for one test.
pub struct Harness {
    dir: TempDir,
    pub config: Config,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.api.grpc.listen_address = EPHEMERAL.to_string();
        config.api.grpc.certs = TlsCredsConfig::in_dir(dir.path(), "grpc");
        config.api.gateway.listen_address = EPHEMERAL.to_string();
        config.api.gateway.certs = TlsCredsConfig::in_dir(dir.path(), "gateway");
        config.api.health.listen_address = EPHEMERAL.to_string();
        assert!(ensure_dev_certs(&config.api).unwrap());
        Self { dir, config }
    }

    pub fn dir(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// Server wired exactly as the binary wires it.
    pub fn server(&self) -> Server {
        build_app(self.config.clone(), CancellationToken::new()).server
    }

    /// Server whose `Info` handler reports `build`.
    pub fn server_reporting(&self, build: BuildInfo) -> Server {
        Server::new(
            SYSTEM_NAME,
            self.config.api.clone(),
            Arc::new(grpc_registrations(InfoService::new(build))),
            Arc::new(GatewayRoutes),
            HttpMetrics::default(),
            CancellationToken::new(),
        )
    }

    /// Server whose gateway routes come from `routes`.
    pub fn server_with_routes(&self, routes: Arc<dyn HandlerRegistrations>) -> Server {
        Server::new(
            SYSTEM_NAME,
            self.config.api.clone(),
            Arc::new(grpc_registrations(InfoService::default())),
            routes,
            HttpMetrics::default(),
            CancellationToken::new(),
        )
    }

    /// HTTPS client trusting the gateway CA.
    pub fn https_client(&self) -> reqwest::Client {
        let ca = std::fs::read(&self.config.api.gateway.certs.tls_ca_cert_path).unwrap();
        reqwest::Client::builder()
            .add_root_certificate(reqwest::Certificate::from_pem(&ca).unwrap())
            .build()
            .unwrap()
    }

    /// TLS channel to the RPC listener of `server`.
    pub async fn grpc_channel(&self, server: &Server) -> Channel {
        let addr = server.local_addr(Listener::Grpc).unwrap();
        Endpoint::from_shared(format!("https://127.0.0.1:{}", addr.port()))
            .unwrap()
            .tls_config(gateway_as_client_tls(&self.config.api.grpc.certs).unwrap())
            .unwrap()
            .connect()
            .await
            .unwrap()
    }
}

/// Gateway URL for `path` on `server`.
pub fn gateway_url(server: &Server, path: &str) -> String {
    let addr = server.local_addr(Listener::Gateway).unwrap();
    format!("https://127.0.0.1:{}{path}", addr.port())
}

async fn health_client(server: &Server) -> HealthClient<Channel> {
    let addr = server.local_addr(Listener::Health).unwrap();
    let channel = Endpoint::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();
    HealthClient::new(channel)
}

/// Status updates for the server's key, starting with the current one.
pub async fn health_watch(server: &Server) -> Streaming<HealthCheckResponse> {
    health_client(server)
        .await
        .watch(HealthCheckRequest {
            service: server.health_key().to_string(),
        })
        .await
        .unwrap()
        .into_inner()
}

/// Next status on a watch stream.
pub async fn next_status(
    watch: &mut Streaming<HealthCheckResponse>,
) -> health_check_response::ServingStatus {
    let response = watch.message().await.unwrap().unwrap();
    health_check_response::ServingStatus::try_from(response.status).unwrap()
}

/// Status the health listener reports for the server's key.
pub async fn health_check(server: &Server) -> health_check_response::ServingStatus {
    let response = health_client(server)
        .await
        .check(HealthCheckRequest {
            service: server.health_key().to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    health_check_response::ServingStatus::try_from(response.status).unwrap()
}

/// Whether something accepts TCP connections on `addr`.
pub async fn accepting(addr: SocketAddr) -> bool {
    tokio::net::TcpStream::connect(addr).await.is_ok()
}

/// Poll until `addr` refuses connections, up to `limit`.
pub async fn closed_within(addr: SocketAddr, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if !accepting(addr).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
