//! Gateway handler registration.

use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use crate::infrastructure::gateway::{GatewayMux, RegistrationError};

/// Deadline for the gateway's dial to the RPC listener.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// How the gateway reaches the RPC listener as a client.
#[derive(Debug, Clone)]
pub struct DialOptions {
    tls: ClientTlsConfig,
    timeout: Duration,
}

impl DialOptions {
    /// Dial over `tls` with the fixed [`DIAL_TIMEOUT`].
    #[must_use]
    pub const fn new(tls: ClientTlsConfig) -> Self {
        Self {
            tls,
            timeout: DIAL_TIMEOUT,
        }
    }

    /// Connection deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Connect to `endpoint`, failing if it does not answer within the deadline.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::InvalidEndpoint` for a malformed target,
    /// `Dial` if the connection or handshake fails and `DialTimeout` if the
    /// deadline elapses.
    pub async fn dial(&self, endpoint: &str) -> Result<Channel, RegistrationError> {
        let invalid = |source| RegistrationError::InvalidEndpoint {
            endpoint: endpoint.to_owned(),
            source,
        };
        let target = Endpoint::from_shared(endpoint.to_owned())
            .map_err(invalid)?
            .tls_config(self.tls.clone())
            .map_err(invalid)?
            .connect_timeout(self.timeout);

        match tokio::time::timeout(self.timeout, target.connect()).await {
            Ok(Ok(channel)) => {
                tracing::debug!(endpoint, "Gateway connected to RPC listener");
                Ok(channel)
            }
            Ok(Err(source)) => Err(RegistrationError::Dial {
                endpoint: endpoint.to_owned(),
                source,
            }),
            Err(_) => Err(RegistrationError::DialTimeout {
                endpoint: endpoint.to_owned(),
                timeout: self.timeout,
            }),
        }
    }
}

/// Attaches gateway routes that call the RPC listener at `endpoint`.
///
/// Invoked once per start, after the RPC listener is accepting and before
/// the gateway serves.
#[async_trait]
pub trait HandlerRegistrations: Send + Sync {
    /// Dial `endpoint` with `options` and register routes on `mux`.
    async fn register(
        &self,
        mux: &mut GatewayMux,
        endpoint: &str,
        options: &DialOptions,
    ) -> Result<(), RegistrationError>;
}
