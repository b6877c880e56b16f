//! Gateway route registry and request/response translation.
//!
//! Each route registered with [`GatewayMux::handle`] decodes the JSON body
//! into the request message, maps selected HTTP headers to call metadata,
//! invokes the RPC and marshals the reply with the profile chosen by the
//! request's `Accept` / `Content-Type` headers.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, on};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, KeyAndValueRef, MetadataMap};
use tonic::{Code, Status};

use super::marshal::{CONTENT_TYPE_JSON, JsonMarshaler, MarshalerRegistry};
use super::{API_PREFIX, RegistrationError};

/// Maps an HTTP header name to a metadata key; `None` drops the header.
pub type HeaderMatcher = fn(&str) -> Option<String>;

/// Prefix for permanent HTTP headers forwarded as metadata.
const GATEWAY_METADATA_PREFIX: &str = "grpcgateway-";

/// Prefix marking a request header as explicit metadata, and a response
/// header as forwarded server metadata.
const METADATA_HEADER_PREFIX: &str = "grpc-metadata-";

/// HTTP status used for cancelled calls (nginx "client closed request").
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Standard HTTP headers forwarded as `grpcgateway-<name>`.
const PERMANENT_HEADERS: [&str; 24] = [
    "accept",
    "accept-charset",
    "accept-language",
    "accept-ranges",
    "authorization",
    "cache-control",
    "content-type",
    "cookie",
    "date",
    "expect",
    "from",
    "host",
    "if-match",
    "if-modified-since",
    "if-none-match",
    "if-schedule-tag-match",
    "if-unmodified-since",
    "max-forwards",
    "origin",
    "pragma",
    "referer",
    "user-agent",
    "via",
    "warning",
];

/// Default header mapping.
///
/// Permanent HTTP headers become `grpcgateway-<name>`, headers prefixed
/// `Grpc-Metadata-` lose the prefix, everything else is dropped.
#[must_use]
pub fn default_header_matcher(key: &str) -> Option<String> {
    let key = key.to_ascii_lowercase();
    if PERMANENT_HEADERS.contains(&key.as_str()) {
        return Some(format!("{GATEWAY_METADATA_PREFIX}{key}"));
    }
    key.strip_prefix(METADATA_HEADER_PREFIX)
        .filter(|rest| !rest.is_empty())
        .map(str::to_owned)
}

/// HTTP status for a gRPC status code.
#[must_use]
pub fn http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => {
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST)
        }
        Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
            StatusCode::BAD_REQUEST
        }
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: i32,
    message: &'a str,
    details: Vec<serde_json::Value>,
}

/// JSON error response carrying `status`, sent with `http`.
fn error_response(marshaler: JsonMarshaler, http: StatusCode, status: &Status) -> Response {
    let body = ErrorBody {
        code: status.code() as i32,
        message: status.message(),
        details: Vec::new(),
    };
    match marshaler.marshal(&body) {
        Ok(bytes) => json_response(http, bytes, status.metadata()),
        Err(e) => {
            tracing::error!(error = %e, "Failed to marshal error body");
            http.into_response()
        }
    }
}

/// JSON error response with the HTTP status mapped from the gRPC code.
#[must_use]
pub fn status_response(marshaler: JsonMarshaler, status: &Status) -> Response {
    error_response(marshaler, http_status(status.code()), status)
}

fn json_response(http: StatusCode, body: Vec<u8>, metadata: &MetadataMap) -> Response {
    let mut response = (
        http,
        [(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON))],
        body,
    )
        .into_response();
    forward_metadata(metadata, response.headers_mut());
    response
}

/// Copy ASCII server metadata onto the response as `Grpc-Metadata-<key>`.
fn forward_metadata(metadata: &MetadataMap, headers: &mut HeaderMap) {
    for entry in metadata.iter() {
        if let KeyAndValueRef::Ascii(key, value) = entry {
            let name = HeaderName::try_from(format!("{METADATA_HEADER_PREFIX}{}", key.as_str()));
            let value = HeaderValue::from_bytes(value.as_encoded_bytes());
            if let (Ok(name), Ok(value)) = (name, value) {
                headers.append(name, value);
            }
        }
    }
}

/// Build call metadata from request headers using `matcher`.
fn incoming_metadata(headers: &HeaderMap, matcher: HeaderMatcher) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    for (name, value) in headers {
        let Some(key) = matcher(name.as_str()) else {
            continue;
        };
        let Ok(value) = AsciiMetadataValue::try_from(value.as_bytes()) else {
            continue;
        };
        if *name == AUTHORIZATION {
            metadata.append("authorization", value.clone());
        }
        match AsciiMetadataKey::from_bytes(key.to_ascii_lowercase().as_bytes()) {
            Ok(key) => {
                metadata.append(key, value);
            }
            Err(_) => tracing::debug!(header = %name, "Dropping header with invalid metadata key"),
        }
    }
    metadata
}

async fn forward<Req, Resp, F, Fut>(
    call: F,
    marshalers: &MarshalerRegistry,
    matcher: HeaderMatcher,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    Req: DeserializeOwned + Default,
    Resp: Serialize,
    F: Fn(tonic::Request<Req>) -> Fut,
    Fut: Future<Output = Result<tonic::Response<Resp>, Status>>,
{
    let (inbound, outbound) = marshalers.for_request(&headers);

    let message: Req = match inbound.unmarshal(&body) {
        Ok(message) => message,
        Err(e) => return status_response(outbound, &Status::invalid_argument(e.to_string())),
    };

    let mut request = tonic::Request::new(message);
    *request.metadata_mut() = incoming_metadata(&headers, matcher);

    match call(request).await {
        Ok(response) => {
            let (metadata, message, _) = response.into_parts();
            match outbound.marshal(&message) {
                Ok(bytes) => json_response(StatusCode::OK, bytes, &metadata),
                Err(e) => status_response(outbound, &Status::internal(e.to_string())),
            }
        }
        Err(status) => status_response(outbound, &status),
    }
}

fn validate_path(path: &str) -> Result<(), RegistrationError> {
    let invalid = |reason| {
        Err(RegistrationError::InvalidPath {
            path: path.to_owned(),
            reason,
        })
    };
    if !path.starts_with(API_PREFIX) {
        return invalid("must start with /api/");
    }
    if path.contains(['{', '}']) || path.split('/').any(|s| s.starts_with([':', '*'])) {
        return invalid("path parameters are not supported");
    }
    Ok(())
}

/// Registry of unary JSON routes proxied to gRPC.
#[derive(Debug, Clone)]
pub struct GatewayMux {
    router: Router,
    registered: Vec<(Method, String)>,
    marshalers: Arc<MarshalerRegistry>,
    header_matcher: HeaderMatcher,
}

impl Default for GatewayMux {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayMux {
    /// Mux with the default marshalers and header matcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            registered: Vec::new(),
            marshalers: Arc::new(MarshalerRegistry::default()),
            header_matcher: default_header_matcher,
        }
    }

    /// Replace the header matcher. Applies to routes registered afterwards.
    #[must_use]
    pub fn with_header_matcher(mut self, matcher: HeaderMatcher) -> Self {
        self.header_matcher = matcher;
        self
    }

    /// Route `method path` to `call`.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError` if the path is outside `/api/`, uses
    /// path parameters, the method cannot be routed, or the route exists.
    pub fn handle<Req, Resp, F, Fut>(
        &mut self,
        method: Method,
        path: &str,
        call: F,
    ) -> Result<&mut Self, RegistrationError>
    where
        Req: DeserializeOwned + Default + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(tonic::Request<Req>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<tonic::Response<Resp>, Status>> + Send + 'static,
    {
        validate_path(path)?;
        let filter = MethodFilter::try_from(method.clone())
            .map_err(|_| RegistrationError::UnsupportedMethod(method.clone()))?;
        if self
            .registered
            .iter()
            .any(|(m, p)| *m == method && p == path)
        {
            return Err(RegistrationError::Duplicate {
                method,
                path: path.to_owned(),
            });
        }

        let marshalers = Arc::clone(&self.marshalers);
        let matcher = self.header_matcher;
        let handler = move |headers: HeaderMap, body: Bytes| {
            let call = call.clone();
            let marshalers = Arc::clone(&marshalers);
            async move { forward(call, &marshalers, matcher, headers, body).await }
        };

        self.router = std::mem::take(&mut self.router).route(path, on(filter, handler));
        tracing::debug!(%method, path, "Gateway route registered");
        self.registered.push((method, path.to_owned()));
        Ok(self)
    }

    /// Registered routes in registration order.
    #[must_use]
    pub fn routes(&self) -> &[(Method, String)] {
        &self.registered
    }

    /// Router serving the registered routes; unknown routes answer with a
    /// JSON `NotFound` error.
    #[must_use]
    pub fn into_router(self) -> Router {
        self.router
            .method_not_allowed_fallback(|| async {
                error_response(
                    JsonMarshaler::FULL,
                    StatusCode::METHOD_NOT_ALLOWED,
                    &Status::unimplemented("Method Not Allowed"),
                )
            })
            .fallback(|| async { status_response(JsonMarshaler::FULL, &Status::not_found("Not Found")) })
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde::Deserialize;
    use serde_json::{Value, json};
    use test_case::test_case;
    use tower::ServiceExt;

    use super::*;
    use crate::infrastructure::gateway::MIME_MASKED;

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(default)]
    struct EchoRequest {
        text: String,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(default)]
    struct EchoResponse {
        text: String,
        length: u32,
        user_agent: String,
        custom: String,
    }

    fn meta(request: &tonic::Request<EchoRequest>, key: &str) -> String {
        request
            .metadata()
            .get(key)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned()
    }

    async fn echo(
        request: tonic::Request<EchoRequest>,
    ) -> Result<tonic::Response<EchoResponse>, Status> {
        let user_agent = meta(&request, "grpcgateway-user-agent");
        let custom = meta(&request, "x-custom");
        let text = request.into_inner().text;
        if text == "missing" {
            return Err(Status::not_found("no such thing"));
        }
        let mut response = tonic::Response::new(EchoResponse {
            length: u32::try_from(text.len()).unwrap_or(u32::MAX),
            text,
            user_agent,
            custom,
        });
        response
            .metadata_mut()
            .insert("x-served-by", AsciiMetadataValue::from_static("echo"));
        Ok(response)
    }

    fn router() -> Router {
        let mut mux = GatewayMux::new();
        mux.handle(Method::POST, "/api/v1/echo", echo).unwrap();
        mux.handle(Method::GET, "/api/v1/echo", echo).unwrap();
        mux.into_router()
    }

    async fn send(request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = router().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn empty_get_emits_zero_values() {
        let (status, headers, body) =
            send(Request::get("/api/v1/echo").body(Body::empty()).unwrap()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers["grpc-metadata-x-served-by"], "echo");
        assert_eq!(
            body,
            json!({"text": "", "length": 0, "user_agent": "", "custom": ""})
        );
    }

    #[tokio::test]
    async fn masked_content_type_omits_zero_values() {
        let request = Request::post("/api/v1/echo")
            .header(CONTENT_TYPE, MIME_MASKED)
            .body(Body::from(r#"{"text":"hi"}"#))
            .unwrap();

        let (status, _, body) = send(request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"text": "hi", "length": 2}));
    }

    #[tokio::test]
    async fn headers_become_metadata() {
        let request = Request::post("/api/v1/echo")
            .header("user-agent", "unit-test")
            .header("grpc-metadata-x-custom", "42")
            .header("x-dropped", "nope")
            .body(Body::from(r#"{"text":"a"}"#))
            .unwrap();

        let (_, _, body) = send(request).await;

        assert_eq!(body["user_agent"], "unit-test");
        assert_eq!(body["custom"], "42");
    }

    #[tokio::test]
    async fn rpc_error_maps_to_http_status() {
        let request = Request::post("/api/v1/echo")
            .body(Body::from(r#"{"text":"missing"}"#))
            .unwrap();

        let (status, _, body) = send(request).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body,
            json!({"code": 5, "message": "no such thing", "details": []})
        );
    }

    #[tokio::test]
    async fn malformed_json_is_invalid_argument() {
        let request = Request::post("/api/v1/echo")
            .body(Body::from("{oops"))
            .unwrap();

        let (status, _, body) = send(request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 3);
    }

    #[tokio::test]
    async fn unknown_route_is_json_not_found() {
        let (status, _, body) =
            send(Request::get("/api/v1/nothing").body(Body::empty()).unwrap()).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"code": 5, "message": "Not Found", "details": []}));
    }

    #[tokio::test]
    async fn wrong_method_is_method_not_allowed() {
        let (status, _, body) =
            send(Request::delete("/api/v1/echo").body(Body::empty()).unwrap()).await;

        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["code"], 12);
    }

    #[test_case("/v1/echo" ; "outside api prefix")]
    #[test_case("/api/v1/things/{id}" ; "brace parameter")]
    #[test_case("/api/v1/things/:id" ; "colon parameter")]
    #[test_case("/api/v1/*rest" ; "wildcard")]
    fn invalid_paths_rejected(path: &str) {
        let mut mux = GatewayMux::new();
        let err = mux.handle(Method::GET, path, echo).unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidPath { .. }));
        assert!(mux.routes().is_empty());
    }

    #[test]
    fn duplicate_route_rejected() {
        let mut mux = GatewayMux::new();
        mux.handle(Method::GET, "/api/v1/echo", echo).unwrap();
        let err = mux.handle(Method::GET, "/api/v1/echo", echo).unwrap_err();
        assert!(matches!(err, RegistrationError::Duplicate { .. }));
        assert_eq!(mux.routes().len(), 1);
    }

    #[test_case("Accept", Some("grpcgateway-accept") ; "permanent header")]
    #[test_case("User-Agent", Some("grpcgateway-user-agent") ; "mixed case permanent")]
    #[test_case("Grpc-Metadata-Tenant-Id", Some("tenant-id") ; "explicit metadata")]
    #[test_case("Grpc-Metadata-", None ; "empty metadata name")]
    #[test_case("X-Request-Id", None ; "other header dropped")]
    fn header_matching(header: &str, expected: Option<&str>) {
        assert_eq!(default_header_matcher(header).as_deref(), expected);
    }

    #[test]
    fn authorization_is_forwarded_twice() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer t"));

        let metadata = incoming_metadata(&headers, default_header_matcher);

        assert_eq!(metadata.get("authorization").unwrap(), "Bearer t");
        assert_eq!(metadata.get("grpcgateway-authorization").unwrap(), "Bearer t");
    }

    #[test_case(Code::Ok, 200)]
    #[test_case(Code::Cancelled, 499)]
    #[test_case(Code::Unknown, 500)]
    #[test_case(Code::InvalidArgument, 400)]
    #[test_case(Code::DeadlineExceeded, 504)]
    #[test_case(Code::NotFound, 404)]
    #[test_case(Code::AlreadyExists, 409)]
    #[test_case(Code::PermissionDenied, 403)]
    #[test_case(Code::Unauthenticated, 401)]
    #[test_case(Code::ResourceExhausted, 429)]
    #[test_case(Code::FailedPrecondition, 400)]
    #[test_case(Code::Aborted, 409)]
    #[test_case(Code::OutOfRange, 400)]
    #[test_case(Code::Unimplemented, 501)]
    #[test_case(Code::Internal, 500)]
    #[test_case(Code::Unavailable, 503)]
    #[test_case(Code::DataLoss, 500)]
    fn status_mapping(code: Code, expected: u16) {
        assert_eq!(http_status(code).as_u16(), expected);
    }
}
