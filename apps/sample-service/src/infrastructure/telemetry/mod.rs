//! Logging and OpenTelemetry Integration
//!
//! Installs the global `tracing` subscriber: an env-filter, a text or JSON
//! fmt layer, and optionally an OTLP span exporter.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Filter directives; wins over the configured level
//! - `OTEL_ENABLED`: Set to "true" to export spans (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: sample-service)
//!
//! # Usage
//!
//! ```ignore
//! use sample_service::infrastructure::telemetry;
//!
//! // Keep the guard alive for the lifetime of the process
//! let _guard = telemetry::init(&config.logging);
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::domain::SYSTEM_NAME;
use crate::infrastructure::config::{LogFormat, LoggingConfig};

/// Default OTLP endpoint (gRPC).
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Noisy transport crates kept at warn unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: &str = "h2=warn,hyper=warn,hyper_util=warn,tower=warn,rustls=warn";

/// Guard that shuts down OpenTelemetry when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// OpenTelemetry export configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Whether spans are exported.
    pub enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: SYSTEM_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let enabled = std::env::var("OTEL_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(defaults.enabled);

        let otlp_endpoint =
            std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or(defaults.otlp_endpoint);

        let service_name = std::env::var("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name);

        Self {
            enabled,
            otlp_endpoint,
            service_name,
        }
    }
}

/// Build the env-filter: `RUST_LOG` if set and valid, otherwise the configured level.
fn env_filter(logging: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},{QUIET_TARGETS}", logging.level)))
}

/// Initialize logging from `logging` and OpenTelemetry from the environment.
///
/// Returns a guard that must be kept alive for the duration of the program.
#[must_use]
pub fn init(logging: &LoggingConfig) -> TelemetryGuard {
    init_with_config(logging, TelemetryConfig::from_env())
}

/// Initialize logging and OpenTelemetry with explicit configuration.
///
/// A failing OTLP exporter is logged and skipped; logging still comes up.
/// Calling this when a global subscriber is already set is a no-op.
#[must_use]
pub fn init_with_config(logging: &LoggingConfig, config: TelemetryConfig) -> TelemetryGuard {
    let (json_layer, text_layer) = match logging.format {
        LogFormat::Json => (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            ),
            None,
        ),
        LogFormat::Text => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        ),
    };

    let mut export_error = None;
    let tracer_provider = if config.enabled {
        match build_tracer_provider(&config) {
            Ok(provider) => Some(provider),
            Err(e) => {
                export_error = Some(e);
                None
            }
        }
    } else {
        None
    };

    let otel_layer = tracer_provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    let installed = tracing_subscriber::registry()
        .with(env_filter(logging))
        .with(json_layer)
        .with(text_layer)
        .with(otel_layer)
        .try_init()
        .is_ok();

    if let Some(e) = export_error {
        tracing::warn!(error = %e, endpoint = %config.otlp_endpoint, "OTLP exporter disabled");
    }
    if !installed {
        tracing::debug!("Global subscriber already installed");
    }

    TelemetryGuard { tracer_provider }
}

fn build_tracer_provider(
    config: &TelemetryConfig,
) -> Result<SdkTracerProvider, opentelemetry_otlp::ExporterBuildError> {
    let otlp_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(otlp_exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build())
}

// =============================================================================
// Tests
// =============================================================================
