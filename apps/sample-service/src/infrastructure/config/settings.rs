//! Service Configuration Settings
//!
//! Configuration types for the three listeners plus logging. Every field
//! has a default so an empty file (or no file) yields a runnable config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix for environment variable overrides (`SAMPLE_SERVICE_API__GRPC__LISTEN_ADDRESS`).
pub const ENV_PREFIX: &str = "SAMPLE_SERVICE";

/// Config file read when no explicit path is given. Optional.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Directory the default certificate paths point into.
#[must_use]
pub fn default_certs_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sample-service")
        .join("certs")
}

// =============================================================================
// TLS
// =============================================================================

/// Paths to the TLS material for one listener.
///
/// A path left out of the file deserializes empty and is filled from the
/// listener's default when the config is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsCredsConfig {
    /// PEM private key.
    #[serde(default, alias = "key_path")]
    pub tls_key_path: PathBuf,
    /// PEM certificate (chain).
    #[serde(default, alias = "cert_path")]
    pub tls_cert_path: PathBuf,
    /// PEM certificate authority used to verify peers.
    #[serde(default, alias = "ca_cert_path")]
    pub tls_ca_cert_path: PathBuf,
}

impl TlsCredsConfig {
    /// Credentials named `<name>.key`, `<name>.crt` and `<name>-ca.crt` inside `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path, name: &str) -> Self {
        Self {
            tls_key_path: dir.join(format!("{name}.key")),
            tls_cert_path: dir.join(format!("{name}.crt")),
            tls_ca_cert_path: dir.join(format!("{name}-ca.crt")),
        }
    }

    /// Replace every empty path with the one from `fallback`.
    pub fn fill_missing(&mut self, fallback: Self) {
        let Self {
            tls_key_path,
            tls_cert_path,
            tls_ca_cert_path,
        } = fallback;
        for (path, default) in [
            (&mut self.tls_key_path, tls_key_path),
            (&mut self.tls_cert_path, tls_cert_path),
            (&mut self.tls_ca_cert_path, tls_ca_cert_path),
        ] {
            if path.as_os_str().is_empty() {
                *path = default;
            }
        }
    }

    /// The three paths in key, cert, CA order.
    #[must_use]
    pub fn paths(&self) -> [&Path; 3] {
        [
            self.tls_key_path.as_path(),
            self.tls_cert_path.as_path(),
            self.tls_ca_cert_path.as_path(),
        ]
    }
}

// =============================================================================
// Listeners
// =============================================================================

/// gRPC listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrpcSettings {
    /// `host:port` to bind.
    #[serde(default = "default_grpc_address")]
    pub listen_address: String,
    /// Idle connection timeout.
    #[serde(default = "default_connection_timeout_seconds")]
    pub connection_timeout_seconds: u32,
    /// TLS material for the listener.
    #[serde(default = "default_grpc_certs")]
    pub certs: TlsCredsConfig,
}

impl GrpcSettings {
    /// Connection timeout as a `Duration`; `None` when configured as zero.
    #[must_use]
    pub fn connection_timeout(&self) -> Option<Duration> {
        (self.connection_timeout_seconds > 0)
            .then(|| Duration::from_secs(u64::from(self.connection_timeout_seconds)))
    }
}

impl Default for GrpcSettings {
    fn default() -> Self {
        Self {
            listen_address: default_grpc_address(),
            connection_timeout_seconds: default_connection_timeout_seconds(),
            certs: default_grpc_certs(),
        }
    }
}

/// HTTP/JSON gateway listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySettings {
    /// `host:port` to bind.
    #[serde(default = "default_gateway_address")]
    pub listen_address: String,
    /// TLS material for the listener.
    #[serde(default = "default_gateway_certs")]
    pub certs: TlsCredsConfig,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            listen_address: default_gateway_address(),
            certs: default_gateway_certs(),
        }
    }
}

/// Health-check listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthSettings {
    /// `host:port` to bind.
    #[serde(default = "default_health_address")]
    pub listen_address: String,
    /// TLS material; plaintext when absent.
    #[serde(default)]
    pub certs: Option<TlsCredsConfig>,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            listen_address: default_health_address(),
            certs: None,
        }
    }
}

/// The `api` section: one entry per listener.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    /// gRPC listener.
    #[serde(default)]
    pub grpc: GrpcSettings,
    /// Gateway listener.
    #[serde(default)]
    pub gateway: GatewaySettings,
    /// Health listener.
    #[serde(default)]
    pub health: HealthSettings,
}

// =============================================================================
// Logging
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default level directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// =============================================================================
// Root
// =============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Listener configuration.
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Load configuration from defaults, a YAML file and the environment,
    /// then apply `overrides`.
    ///
    /// An explicit `path` must exist. Without one, `config.yaml` in the
    /// working directory is read if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotFound` for a missing explicit file and
    /// `ConfigError::Load` when a source cannot be read or deserialized.
    pub fn load(
        path: Option<&Path>,
        overrides: impl FnOnce(&mut Self),
    ) -> Result<Self, ConfigError> {
        Self::load_with_environment(path, environment_source(), overrides)
    }

    pub(crate) fn load_with_environment(
        path: Option<&Path>,
        environment: config::Environment,
        overrides: impl FnOnce(&mut Self),
    ) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true)
            }
            None => config::File::from(Path::new(DEFAULT_CONFIG_FILE))
                .format(config::FileFormat::Yaml)
                .required(false),
        };

        // Serde field defaults only; a serialized defaults layer would collide
        // with the `key_path` aliases.
        let mut cfg: Self = config::Config::builder()
            .add_source(file)
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        cfg.api.grpc.certs.fill_missing(default_grpc_certs());
        cfg.api.gateway.certs.fill_missing(default_gateway_certs());

        overrides(&mut cfg);
        Ok(cfg)
    }
}

fn environment_source() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("config file '{}' doesn't exist", .0.display())]
    NotFound(PathBuf),
    /// A source could not be read or the merged result did not deserialize.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

fn default_grpc_address() -> String {
    "0.0.0.0:8282".to_string()
}

fn default_gateway_address() -> String {
    "0.0.0.0:8383".to_string()
}

fn default_health_address() -> String {
    "0.0.0.0:8484".to_string()
}

const fn default_connection_timeout_seconds() -> u32 {
    120
}

fn default_grpc_certs() -> TlsCredsConfig {
    TlsCredsConfig::in_dir(&default_certs_dir(), "grpc")
}

fn default_gateway_certs() -> TlsCredsConfig {
    TlsCredsConfig::in_dir(&default_certs_dir(), "gateway")
}

fn default_log_level() -> String {
    "info".to_string()
}
