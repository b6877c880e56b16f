//! HTTP/JSON Gateway
//!
//! Translates JSON requests under `/api/` into gRPC calls against the RPC
//! listener and translates the replies back.
//!
//! - [`mux`]: route registry and request/response translation
//! - [`marshal`]: full and masked JSON profiles
//! - [`server`]: listener assembly (CORS, field masks, metrics, TLS)

pub mod marshal;
pub mod mux;
pub mod server;

use axum::http::Method;

pub use marshal::{JsonMarshaler, MIME_MASKED, MarshalerRegistry};
pub use mux::{GatewayMux, HeaderMatcher, default_header_matcher, http_status};
pub use server::{GatewayServer, build_gateway_server, has_fields_mask, is_local_origin};

/// Prefix every gateway route lives under.
pub const API_PREFIX: &str = "/api/";

/// Failure to wire a route into the gateway.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// Route path is outside `/api/` or uses unsupported syntax.
    #[error("invalid gateway path '{path}': {reason}")]
    InvalidPath {
        /// Rejected path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// HTTP method cannot be routed.
    #[error("unsupported HTTP method {0}")]
    UnsupportedMethod(Method),

    /// The method and path are already registered.
    #[error("route {method} {path} registered twice")]
    Duplicate {
        /// HTTP method.
        method: Method,
        /// Route path.
        path: String,
    },

    /// The RPC endpoint address is malformed.
    #[error("invalid RPC endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        /// Dial target.
        endpoint: String,
        /// Parse failure.
        source: tonic::transport::Error,
    },

    /// The RPC endpoint refused the connection or the handshake failed.
    #[error("failed to dial RPC endpoint '{endpoint}': {source}")]
    Dial {
        /// Dial target.
        endpoint: String,
        /// Transport failure.
        source: tonic::transport::Error,
    },

    /// The RPC endpoint did not answer within the dial deadline.
    #[error("timed out dialing RPC endpoint '{endpoint}' after {timeout:?}")]
    DialTimeout {
        /// Dial target.
        endpoint: String,
        /// Deadline that elapsed.
        timeout: std::time::Duration,
    },
}
