//! Prometheus Metrics Module
//!
//! Exposes request metrics for both protocol surfaces in Prometheus format.
//!
//! # Metrics
//!
//! - `sample_service_rpc_requests_total{method, status}` - gRPC calls by outcome
//! - `sample_service_rpc_request_duration_seconds{method}` - gRPC call latency
//! - `sample_service_http_requests_total{method, path, status}` - gateway requests
//! - `sample_service_http_request_duration_seconds{method, path}` - gateway latency
//!
//! # Integration
//!
//! Metrics are rendered at `/metrics` on the gateway listener.

use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const RPC_REQUESTS: &str = "sample_service_rpc_requests_total";
const RPC_DURATION: &str = "sample_service_rpc_request_duration_seconds";
const HTTP_REQUESTS: &str = "sample_service_http_requests_total";
const HTTP_DURATION: &str = "sample_service_http_request_duration_seconds";

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the Prometheus recorder as the global metrics recorder.
///
/// Safe to call repeatedly; the first call installs. Returns `None` if a
/// different global recorder was already installed.
pub fn init_metrics() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            match metrics::set_global_recorder(recorder) {
                Ok(()) => {
                    register_metrics();
                    Some(handle)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Metrics recorder already installed");
                    None
                }
            }
        })
        .clone()
}

fn register_metrics() {
    describe_counter!(RPC_REQUESTS, "Total gRPC calls by method and status code");
    describe_histogram!(RPC_DURATION, "gRPC call latency");
    describe_counter!(HTTP_REQUESTS, "Total gateway requests by route and status");
    describe_histogram!(HTTP_DURATION, "Gateway request latency");
}

// =============================================================================
// RPC statistics
// =============================================================================

/// Middleware recording call counts and latency for gRPC routes.
///
/// The status label comes from the `grpc-status` header of trailers-only
/// responses; a response without it carries its status in trailers and is
/// counted as `0` (OK), which holds for unary calls.
pub async fn record_rpc(request: Request, next: Next) -> Response {
    let method = request.uri().path().to_owned();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response
        .headers()
        .get("grpc-status")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("0")
        .to_owned();

    counter!(RPC_REQUESTS, "method" => method.clone(), "status" => status).increment(1);
    histogram!(RPC_DURATION, "method" => method).record(started.elapsed().as_secs_f64());

    response
}

// =============================================================================
// HTTP metrics
// =============================================================================

/// Metrics recorder for the HTTP gateway.
#[derive(Debug, Clone, Default)]
pub struct HttpMetrics {
    handle: Option<PrometheusHandle>,
}

impl HttpMetrics {
    /// Recorder rendering from `handle`; records only when a global recorder exists.
    #[must_use]
    pub const fn new(handle: Option<PrometheusHandle>) -> Self {
        Self { handle }
    }

    /// Recorder bound to the process-wide handle, installing it if needed.
    #[must_use]
    pub fn global() -> Self {
        Self::new(init_metrics())
    }

    /// Render all metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.as_ref().map_or_else(String::new, |handle| {
            handle.run_upkeep();
            handle.render()
        })
    }

    fn record(&self, method: &str, path: String, status: u16, elapsed_secs: f64) {
        counter!(
            HTTP_REQUESTS,
            "method" => method.to_owned(),
            "path" => path.clone(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!(HTTP_DURATION, "method" => method.to_owned(), "path" => path)
            .record(elapsed_secs);
    }
}

/// Middleware recording gateway requests, labelled by the matched route template.
pub async fn record_http(
    State(metrics): State<HttpMetrics>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_owned(), |p| p.as_str().to_owned());
    let started = Instant::now();

    let response = next.run(request).await;

    metrics.record(
        method.as_str(),
        path,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}
