//! Configuration Module
//!
//! Layered configuration for the service: built-in defaults, an optional
//! YAML file, `SAMPLE_SERVICE_*` environment variables, and finally a
//! caller-supplied overrider.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sample_service::infrastructure::config::Config;
//!
//! // Load from ./config.yaml if present
//! let config = Config::load(None, |_| {})?;
//!
//! // Load from an explicit file and pin the gRPC port
//! let config = Config::load(Some(Path::new("dev.yaml")), |cfg| {
//!     cfg.api.grpc.listen_address = "127.0.0.1:9000".to_string();
//! })?;
//! ```

mod settings;

pub use settings::{
    ApiConfig, Config, ConfigError, DEFAULT_CONFIG_FILE, ENV_PREFIX, GatewaySettings,
    GrpcSettings, HealthSettings, LogFormat, LoggingConfig, TlsCredsConfig, default_certs_dir,
};
