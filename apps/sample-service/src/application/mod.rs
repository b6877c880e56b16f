//! Application Layer
//!
//! The example business handler and the two registration callbacks that
//! attach it to the RPC server and the gateway.

/// `Info` RPC implementation.
pub mod info;

/// RPC and gateway registration callbacks.
pub mod registrations;

pub use info::InfoService;
pub use registrations::{GatewayRoutes, grpc_registrations};
