//! Orchestrator error types.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::task::JoinError;

use super::State;
use crate::infrastructure::gateway::RegistrationError;
use crate::infrastructure::tls::CredentialError;

/// One of the three network endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Listener {
    /// RPC listener hosting the registered services.
    Grpc,
    /// HTTP/JSON gateway listener.
    Gateway,
    /// Health-check listener.
    Health,
}

impl Listener {
    /// Short lowercase name used in logs and span fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Grpc => "grpc",
            Self::Gateway => "gateway",
            Self::Health => "health",
        }
    }
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from building or starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// TLS material for a listener is missing or invalid.
    #[error("{listener} credentials: {source}")]
    Credential {
        /// Listener whose credentials failed.
        listener: Listener,
        /// Underlying failure.
        source: CredentialError,
    },

    /// A listener could not claim its address.
    #[error("failed to bind {listener} listener on {address}: {source}")]
    Bind {
        /// Listener that failed to bind.
        listener: Listener,
        /// Configured address.
        address: String,
        /// OS error.
        source: std::io::Error,
    },

    /// Gateway routes could not be registered against the RPC listener.
    #[error("gateway registration failed: {0}")]
    Registration(#[from] RegistrationError),

    /// The transport rejected the listener configuration.
    #[error("{listener} transport: {source}")]
    Transport {
        /// Listener being configured.
        listener: Listener,
        /// Transport failure.
        source: tonic::transport::Error,
    },

    /// A registered descriptor set could not be served through reflection.
    #[error("reflection: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),

    /// The operation is not valid in the server's current state.
    #[error("cannot {operation} server in state {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// State at the time of the call.
        state: State,
    },
}

/// A listener task that ended with an error after it started serving.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The serve loop returned an error.
    #[error("{listener} listener on {address} failed: {source}")]
    Serve {
        /// Failing listener.
        listener: Listener,
        /// Bound address.
        address: SocketAddr,
        /// Serve loop error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The task panicked or was aborted.
    #[error("listener task did not complete: {0}")]
    Join(#[from] JoinError),
}

/// A non-fatal failure during shutdown.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    /// The listener did not drain within its deadline and was closed forcibly.
    #[error("{listener} listener did not drain within {timeout:?}")]
    Timeout {
        /// Listener that timed out.
        listener: Listener,
        /// Deadline that elapsed.
        timeout: Duration,
    },
}

/// Every [`ShutdownError`] from one `stop` call.
#[derive(Debug, Default)]
pub struct ShutdownErrors(Vec<ShutdownError>);

impl ShutdownErrors {
    /// Record one failure.
    pub fn push(&mut self, error: ShutdownError) {
        self.0.push(error);
    }

    /// Whether nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Collected failures in the order they happened.
    #[must_use]
    pub fn errors(&self) -> &[ShutdownError] {
        &self.0
    }

    /// `Ok` if nothing failed, otherwise `Err(self)`.
    ///
    /// # Errors
    ///
    /// Returns `self` when at least one failure was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ShutdownErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.len() {
            1 => writeln!(f, "1 error occurred:")?,
            n => writeln!(f, "{n} errors occurred:")?,
        }
        for error in &self.0 {
            writeln!(f, "\t* {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ShutdownErrors {}
