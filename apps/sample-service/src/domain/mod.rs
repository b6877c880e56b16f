//! Domain Layer - Core types with no framework dependencies.
//!
//! Holds the build metadata reported by the running binary.

/// Build metadata stamped at compile time.
pub mod build_info;

pub use build_info::{BuildInfo, SYSTEM_NAME};
