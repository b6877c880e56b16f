//! Server Orchestrator
//!
//! Runs the RPC, gateway and health listeners under one lifecycle.
//!
//! # Start
//!
//! 1. Health status `NOT_SERVING`
//! 2. Build all three listeners (TLS is loaded here, before anything binds)
//! 3. Health listener serving
//! 4. RPC listener serving
//! 5. Gateway dials the RPC listener and registers its routes
//! 6. Gateway listener serving
//! 7. Health status `SERVING`
//!
//! # Stop
//!
//! 1. Health status `NOT_SERVING`
//! 2. Gateway drains (bounded by [`GATEWAY_SHUTDOWN_TIMEOUT`])
//! 3. RPC listener drains
//! 4. Health listener drains
//! 5. Listener tasks joined, failures logged
//! 6. Lifetime context cancelled

mod error;
mod registrations;
mod task_group;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use error::{Listener, ServerError, ShutdownError, ShutdownErrors, TaskError};
pub use registrations::{DIAL_TIMEOUT, DialOptions, HandlerRegistrations};
pub use task_group::TaskGroup;

use crate::infrastructure::config::ApiConfig;
use crate::infrastructure::gateway::{GatewayServer, build_gateway_server};
use crate::infrastructure::grpc::{GrpcEndpoint, Registrations, build_grpc_server};
use crate::infrastructure::health::{
    ServingStatus, ServingStatusRegistry, build_health_server, health_service_name,
};
use crate::infrastructure::metrics::HttpMetrics;
use crate::infrastructure::tls::{gateway_as_client_tls, install_crypto_provider};

/// Longest wait for in-flight gateway requests during stop.
pub const GATEWAY_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Built, nothing bound.
    Constructed,
    /// `start` in progress, or `start` failed part way.
    Starting,
    /// All listeners serving.
    Running,
    /// `stop` in progress.
    Stopping,
    /// Stopped; terminal.
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Constructed => "constructed",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// A spawned tonic listener.
#[derive(Debug)]
struct EndpointHandle {
    address: SocketAddr,
    shutdown: CancellationToken,
    done: CancellationToken,
}

impl EndpointHandle {
    async fn graceful_stop(self, listener: Listener) {
        tracing::info!(%listener, address = %self.address, "Stopping listener");
        self.shutdown.cancel();
        self.done.cancelled().await;
    }
}

/// The spawned gateway listener.
#[derive(Debug)]
struct GatewayHandle {
    address: SocketAddr,
    handle: axum_server::Handle,
    done: CancellationToken,
}

/// Handles of the listeners started so far.
#[derive(Debug, Default)]
struct Listeners {
    grpc: Option<EndpointHandle>,
    gateway: Option<GatewayHandle>,
    health: Option<EndpointHandle>,
}

/// The three listeners built and ready to bind.
struct Components {
    grpc: GrpcEndpoint,
    gateway: GatewayServer,
    health: GrpcEndpoint,
}

/// Orchestrates the RPC, gateway and health listeners.
pub struct Server {
    config: ApiConfig,
    registrations: Arc<dyn Registrations>,
    handler_registrations: Arc<dyn HandlerRegistrations>,
    metrics: HttpMetrics,
    health: ServingStatusRegistry,
    health_key: String,
    context: CancellationToken,
    tasks: TaskGroup,
    listeners: Listeners,
    state: State,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state)
            .field("health_key", &self.health_key)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

async fn bind(listener: Listener, address: &str) -> Result<(TcpListener, SocketAddr), ServerError> {
    let bind_error = |source| ServerError::Bind {
        listener,
        address: address.to_owned(),
        source,
    };
    let socket = TcpListener::bind(address).await.map_err(bind_error)?;
    let local = socket.local_addr().map_err(bind_error)?;
    Ok((socket, local))
}

impl Server {
    /// Server for `service` reporting health under `grpc.health.v1.<service>`.
    ///
    /// Nothing is loaded or bound until [`start`](Self::start).
    #[must_use]
    pub fn new(
        service: &str,
        config: ApiConfig,
        registrations: Arc<dyn Registrations>,
        handler_registrations: Arc<dyn HandlerRegistrations>,
        metrics: HttpMetrics,
        context: CancellationToken,
    ) -> Self {
        install_crypto_provider();
        Self {
            config,
            registrations,
            handler_registrations,
            metrics,
            health: ServingStatusRegistry::new(),
            health_key: health_service_name(service),
            tasks: TaskGroup::new(context.clone()),
            context,
            listeners: Listeners::default(),
            state: State::Constructed,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Health status registry driving the health listener.
    #[must_use]
    pub const fn health(&self) -> &ServingStatusRegistry {
        &self.health
    }

    /// Health key this server reports under.
    #[must_use]
    pub fn health_key(&self) -> &str {
        &self.health_key
    }

    /// Lifetime context; cancelled by a failing listener and at the end of `stop`.
    #[must_use]
    pub const fn context(&self) -> &CancellationToken {
        &self.context
    }

    /// Bound address of `listener`, once it is serving.
    #[must_use]
    pub fn local_addr(&self, listener: Listener) -> Option<SocketAddr> {
        match listener {
            Listener::Grpc => self.listeners.grpc.as_ref().map(|h| h.address),
            Listener::Gateway => self.listeners.gateway.as_ref().map(|h| h.address),
            Listener::Health => self.listeners.health.as_ref().map(|h| h.address),
        }
    }

    /// Start every listener.
    ///
    /// Returns once all three accept connections. On error, listeners that
    /// already started keep running until [`stop`](Self::stop).
    ///
    /// # Errors
    ///
    /// Returns `ServerError::InvalidState` unless the server is freshly
    /// constructed, and the credential, bind or registration failure that
    /// aborted startup otherwise.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        if self.state != State::Constructed {
            return Err(ServerError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        self.state = State::Starting;
        self.health
            .set(&self.health_key, ServingStatus::NotServing)
            .await;

        let Components {
            grpc,
            mut gateway,
            health,
        } = self.build()?;

        let (socket, address) = bind(Listener::Health, &self.config.health.listen_address).await?;
        self.listeners.health = Some(self.spawn_endpoint(health, socket, address));

        let (socket, address) = bind(Listener::Grpc, &self.config.grpc.listen_address).await?;
        self.listeners.grpc = Some(self.spawn_endpoint(grpc, socket, address));

        self.register_gateway(&mut gateway, address).await?;

        let (socket, address) =
            bind(Listener::Gateway, &self.config.gateway.listen_address).await?;
        self.listeners.gateway = Some(self.spawn_gateway(gateway, socket, address));

        self.health
            .set(&self.health_key, ServingStatus::Serving)
            .await;
        self.state = State::Running;
        tracing::info!(
            grpc = ?self.local_addr(Listener::Grpc),
            gateway = ?self.local_addr(Listener::Gateway),
            health = ?self.local_addr(Listener::Health),
            "Server running"
        );
        Ok(())
    }

    fn build(&self) -> Result<Components, ServerError> {
        let health = build_health_server(&self.config.health, &self.health)?;
        let grpc = build_grpc_server(&self.config.grpc, self.registrations.as_ref())?;
        let gateway = build_gateway_server(&self.config.gateway, self.metrics.clone())?;
        Ok(Components {
            grpc,
            gateway,
            health,
        })
    }

    async fn register_gateway(
        &self,
        gateway: &mut GatewayServer,
        grpc: SocketAddr,
    ) -> Result<(), ServerError> {
        let tls = gateway_as_client_tls(&self.config.grpc.certs).map_err(|source| {
            ServerError::Credential {
                listener: Listener::Gateway,
                source,
            }
        })?;
        let endpoint = format!("https://127.0.0.1:{}", grpc.port());

        self.handler_registrations
            .register(gateway.mux_mut(), &endpoint, &DialOptions::new(tls))
            .await?;

        tracing::info!(
            endpoint,
            routes = gateway.mux_mut().routes().len(),
            "Gateway routes registered"
        );
        Ok(())
    }

    fn spawn_endpoint(
        &self,
        endpoint: GrpcEndpoint,
        socket: TcpListener,
        address: SocketAddr,
    ) -> EndpointHandle {
        let listener = endpoint.listener();
        let shutdown = CancellationToken::new();
        let done = CancellationToken::new();
        let guard = done.clone().drop_guard();
        let signal = shutdown.clone();

        self.tasks.spawn(listener, address, async move {
            let _guard = guard;
            endpoint.serve(socket, signal).await
        });
        tracing::info!(%listener, %address, "Listener started");

        EndpointHandle {
            address,
            shutdown,
            done,
        }
    }

    fn spawn_gateway(
        &self,
        gateway: GatewayServer,
        socket: TcpListener,
        address: SocketAddr,
    ) -> GatewayHandle {
        let handle = axum_server::Handle::new();
        let done = CancellationToken::new();
        let guard = done.clone().drop_guard();
        let serve_handle = handle.clone();

        self.tasks.spawn(Listener::Gateway, address, async move {
            let _guard = guard;
            gateway.serve(socket, serve_handle).await
        });
        tracing::info!(listener = %Listener::Gateway, %address, "Listener started");

        GatewayHandle {
            address,
            handle,
            done,
        }
    }

    /// Stop every started listener in order. Safe to call repeatedly and
    /// after a failed start.
    ///
    /// # Errors
    ///
    /// Returns every shutdown step that did not complete cleanly. Listener
    /// task failures are logged, not returned.
    pub async fn stop(&mut self) -> Result<(), ShutdownErrors> {
        if matches!(self.state, State::Stopping | State::Stopped) {
            return Ok(());
        }
        let previous = self.state;
        self.state = State::Stopping;
        tracing::info!(from = %previous, "Stopping server");

        let mut errors = ShutdownErrors::default();

        self.health
            .set(&self.health_key, ServingStatus::NotServing)
            .await;

        if let Some(gateway) = self.listeners.gateway.take() {
            self.stop_gateway(gateway, &mut errors).await;
        }
        if let Some(grpc) = self.listeners.grpc.take() {
            grpc.graceful_stop(Listener::Grpc).await;
        }
        if let Some(health) = self.listeners.health.take() {
            health.graceful_stop(Listener::Health).await;
        }

        if let Err(e) = self.tasks.wait().await {
            tracing::error!(error = %e, "Listener task failed");
        }

        self.context.cancel();
        self.state = State::Stopped;
        tracing::info!("Server stopped");
        errors.into_result()
    }

    async fn stop_gateway(&self, gateway: GatewayHandle, errors: &mut ShutdownErrors) {
        tracing::info!(
            listener = %Listener::Gateway,
            address = %gateway.address,
            "Stopping listener"
        );
        gateway.handle.graceful_shutdown(None);

        tokio::select! {
            drained = tokio::time::timeout(GATEWAY_SHUTDOWN_TIMEOUT, gateway.done.cancelled()) => {
                if drained.is_err() {
                    errors.push(ShutdownError::Timeout {
                        listener: Listener::Gateway,
                        timeout: GATEWAY_SHUTDOWN_TIMEOUT,
                    });
                    gateway.handle.shutdown();
                }
            }
            () = self.context.cancelled() => {
                tracing::info!("Lifetime context cancelled while draining gateway");
                gateway.handle.shutdown();
            }
        }
    }
}
