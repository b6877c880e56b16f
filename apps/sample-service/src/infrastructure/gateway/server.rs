//! Gateway listener assembly.
//!
//! Wraps the [`GatewayMux`] router with the field-mask switch, request
//! metrics, a `/metrics` endpoint and a CORS policy limited to local
//! origins, and serves it over TLS.

use std::fmt;
use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use axum::http::header::{ACCEPT, CONTENT_TYPE, ORIGIN};
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};

use super::marshal::MIME_MASKED;
use super::mux::{GatewayMux, default_header_matcher};
use crate::infrastructure::config::GatewaySettings;
use crate::infrastructure::metrics::{HttpMetrics, record_http};
use crate::infrastructure::server::{Listener, ServerError};
use crate::infrastructure::tls::gateway_server_tls;

/// Query parameter that switches a request to the masked JSON profile.
const FIELDS_MASK_PARAM: &str = "fields.mask";

const LOCAL_HOSTS: [&str; 2] = ["localhost", "127.0.0.1"];

/// Header mapping installed on the gateway; exempted headers go here ahead
/// of the default mapping.
fn custom_header_matcher(key: &str) -> Option<String> {
    default_header_matcher(key)
}

/// Whether `origin` is `http(s)://localhost` or `http(s)://127.0.0.1`,
/// optionally followed by a numeric port.
#[must_use]
pub fn is_local_origin(origin: &str) -> bool {
    let Some(rest) = origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"))
    else {
        return false;
    };
    let (host, port) = rest.split_once(':').map_or((rest, None), |(h, p)| (h, Some(p)));
    LOCAL_HOSTS.contains(&host)
        && port.is_none_or(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

/// Whether the query string carries a non-empty `fields.mask` parameter.
#[must_use]
pub fn has_fields_mask(query: Option<&str>) -> bool {
    query.is_some_and(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(key, _)| key == FIELDS_MASK_PARAM)
            .is_some_and(|(_, value)| !value.is_empty())
    })
}

/// Route requests carrying a field mask through the masked profile.
async fn fields_mask(mut request: Request, next: Next) -> Response {
    if has_fields_mask(request.uri().query()) {
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(MIME_MASKED));
    }
    next.run(request).await
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _: &Parts| {
            origin.to_str().is_ok_and(is_local_origin)
        }))
        .allow_methods([Method::GET, Method::POST, Method::HEAD])
        .allow_headers([
            ORIGIN,
            ACCEPT,
            CONTENT_TYPE,
            HeaderName::from_static("x-requested-with"),
        ])
}

/// Middleware hook applied to the `/api/` router.
type Extension = Box<dyn FnOnce(Router) -> Router + Send>;

/// The gateway listener before binding.
pub struct GatewayServer {
    mux: GatewayMux,
    tls: Arc<rustls::ServerConfig>,
    metrics: HttpMetrics,
    extensions: Vec<Extension>,
}

impl fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayServer")
            .field("mux", &self.mux)
            .field("metrics", &self.metrics)
            .field("extensions", &self.extensions.len())
            .finish_non_exhaustive()
    }
}

impl GatewayServer {
    /// Mux that handler registrations add routes to.
    pub fn mux_mut(&mut self) -> &mut GatewayMux {
        &mut self.mux
    }

    /// Wrap the `/api/` routes with extra middleware, inside CORS and metrics.
    /// Extensions apply in the order added.
    pub fn extend(&mut self, extension: impl FnOnce(Router) -> Router + Send + 'static) {
        self.extensions.push(Box::new(extension));
    }

    /// The fully layered router.
    #[must_use]
    pub fn into_router(self) -> Router {
        let metrics = self.metrics;
        let exporter = metrics.clone();

        let api = self
            .extensions
            .into_iter()
            .fold(self.mux.into_router(), |router, extend| extend(router));

        api.layer(middleware::from_fn(fields_mask))
            .merge(Router::new().route(
                "/metrics",
                get(move || {
                    let exporter = exporter.clone();
                    async move { exporter.render() }
                }),
            ))
            .layer(middleware::from_fn_with_state(metrics, record_http))
            .layer(cors())
    }

    /// Serve TLS on `listener` until `handle` shuts it down.
    ///
    /// # Errors
    ///
    /// Returns the I/O error that stopped the accept loop.
    pub async fn serve(self, listener: TcpListener, handle: Handle) -> std::io::Result<()> {
        let tls = RustlsConfig::from_config(Arc::clone(&self.tls));
        let router = self.into_router();
        axum_server::from_tcp_rustls(listener.into_std()?, tls)
            .handle(handle)
            .serve(router.into_make_service())
            .await
    }
}

/// Build the gateway listener with an empty mux.
///
/// # Errors
///
/// Returns `ServerError::Credential` if the gateway TLS material cannot be loaded.
pub fn build_gateway_server(
    settings: &GatewaySettings,
    metrics: HttpMetrics,
) -> Result<GatewayServer, ServerError> {
    let tls = gateway_server_tls(&settings.certs).map_err(|source| ServerError::Credential {
        listener: Listener::Gateway,
        source,
    })?;

    Ok(GatewayServer {
        mux: GatewayMux::new().with_header_matcher(custom_header_matcher),
        tls,
        metrics,
        extensions: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde::{Deserialize, Serialize};
    use serde_json::{Value, json};
    use test_case::test_case;
    use tower::ServiceExt;

    use super::*;
    use crate::infrastructure::config::TlsCredsConfig;
    use crate::infrastructure::tls::generate_dev_cert;

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(default)]
    struct Counter {
        name: String,
        count: u32,
    }

    async fn count(
        request: tonic::Request<Counter>,
    ) -> Result<tonic::Response<Counter>, tonic::Status> {
        Ok(tonic::Response::new(request.into_inner()))
    }

    fn router(dir: &std::path::Path) -> Router {
        let settings = GatewaySettings {
            listen_address: "127.0.0.1:0".to_string(),
            certs: TlsCredsConfig::in_dir(dir, "gateway"),
        };
        generate_dev_cert("gateway-test", &settings.certs).unwrap();

        let mut server = build_gateway_server(&settings, HttpMetrics::global()).unwrap();
        server
            .mux_mut()
            .handle(Method::GET, "/api/v1/count", count)
            .unwrap();
        server.into_router()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test_case("http://localhost", true)]
    #[test_case("https://localhost:8443", true)]
    #[test_case("http://127.0.0.1:3000", true)]
    #[test_case("http://localhost:", false ; "empty port")]
    #[test_case("http://localhost:80a", false ; "non numeric port")]
    #[test_case("http://example.com", false)]
    #[test_case("http://localhost.example.com", false)]
    #[test_case("ftp://localhost", false)]
    #[test_case("localhost", false ; "missing scheme")]
    fn local_origin(origin: &str, expected: bool) {
        assert_eq!(is_local_origin(origin), expected);
    }

    #[test_case(None, false ; "no query")]
    #[test_case(Some("a=b"), false ; "other params")]
    #[test_case(Some("fields.mask="), false ; "empty mask")]
    #[test_case(Some("fields.mask=name"), true ; "mask present")]
    #[test_case(Some("x=1&fields.mask=name%2Ccount"), true ; "encoded mask")]
    fn fields_mask_detection(query: Option<&str>, expected: bool) {
        assert_eq!(has_fields_mask(query), expected);
    }

    #[tokio::test]
    async fn full_profile_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(dir.path())
            .oneshot(Request::get("/api/v1/count").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"name": "", "count": 0}));
    }

    #[tokio::test]
    async fn field_mask_selects_masked_profile() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(dir.path())
            .oneshot(
                Request::get("/api/v1/count?fields.mask=name")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({}));
    }

    #[tokio::test]
    async fn preflight_from_local_origin_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(dir.path())
            .oneshot(
                Request::options("/api/v1/count")
                    .header(ORIGIN, "http://localhost:3000")
                    .header("access-control-request-method", "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "http://localhost:3000"
        );
    }

    #[tokio::test]
    async fn foreign_origin_gets_no_cors_headers() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(dir.path())
            .oneshot(
                Request::get("/api/v1/count")
                    .header(ORIGIN, "https://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(!response.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn extensions_wrap_api_routes() {
        let dir = tempfile::tempdir().unwrap();
        let settings = GatewaySettings {
            listen_address: "127.0.0.1:0".to_string(),
            certs: TlsCredsConfig::in_dir(dir.path(), "gateway"),
        };
        generate_dev_cert("gateway-test", &settings.certs).unwrap();
        let mut server = build_gateway_server(&settings, HttpMetrics::default()).unwrap();
        server
            .mux_mut()
            .handle(Method::GET, "/api/v1/count", count)
            .unwrap();
        server.extend(|router| {
            router.layer(middleware::map_response(|mut response: Response| async move {
                response
                    .headers_mut()
                    .insert("x-extended", HeaderValue::from_static("yes"));
                response
            }))
        });

        let response = server
            .into_router()
            .oneshot(Request::get("/api/v1/count").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.headers()["x-extended"], "yes");
    }

    #[tokio::test]
    async fn metrics_endpoint_renders() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path());

        let _ = app
            .clone()
            .oneshot(Request::get("/api/v1/count").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("sample_service_http_requests_total"));
    }

    #[test]
    fn missing_certs_name_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let settings = GatewaySettings {
            listen_address: "127.0.0.1:0".to_string(),
            certs: TlsCredsConfig::in_dir(dir.path(), "absent"),
        };

        let err = build_gateway_server(&settings, HttpMetrics::default()).unwrap_err();
        assert!(matches!(
            err,
            ServerError::Credential {
                listener: Listener::Gateway,
                ..
            }
        ));
    }
}
