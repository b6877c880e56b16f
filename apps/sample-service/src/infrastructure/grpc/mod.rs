//! gRPC Server
//!
//! Builds the RPC listener: a [`ServiceRegistry`] collects the service
//! implementations attached by a [`Registrations`] callback, reflection is
//! derived from the registered descriptor sets, and [`GrpcEndpoint`] serves
//! the result over TLS until its shutdown token fires.

pub mod registry;
pub mod server;

// Allow clippy warnings and missing docs in generated code
#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
pub mod proto {
    pub mod sample {
        pub mod info {
            pub mod v1 {
                include!(concat!(env!("OUT_DIR"), "/sample.info.v1.rs"));
            }
        }
    }

    /// Encoded descriptor set for every compiled proto, used by reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/sample_descriptor.bin"));
}

pub use registry::{Registrations, ServiceRegistry};
pub use server::{GrpcEndpoint, build_grpc_server};
