//! Shutdown Ordering Integration Tests
//!
//! A gateway request that outlives the drain window, cancellation during
//! the drain, and the health flip happening while listeners still serve.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::Method;
use common::{Harness, accepting, gateway_url, health_watch, next_status};
use sample_service::infrastructure::gateway::{GatewayMux, RegistrationError};
use sample_service::infrastructure::server::{
    DialOptions, GATEWAY_SHUTDOWN_TIMEOUT, HandlerRegistrations, ShutdownError,
};
use sample_service::proto::{InfoRequest, InfoResponse};
use sample_service::{Listener, Server, State};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tonic_health::pb::health_check_response::ServingStatus;

const SLOW_PATH: &str = "/api/v1/slow";

/// Gateway route that signals `entered` and then never answers in time.
struct SlowRoute {
    entered: Arc<Notify>,
}

#[async_trait]
impl HandlerRegistrations for SlowRoute {
    async fn register(
        &self,
        mux: &mut GatewayMux,
        _: &str,
        _: &DialOptions,
    ) -> Result<(), RegistrationError> {
        let entered = Arc::clone(&self.entered);
        mux.handle(Method::GET, SLOW_PATH, move |_: tonic::Request<InfoRequest>| {
            let entered = Arc::clone(&entered);
            async move {
                entered.notify_one();
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(tonic::Response::new(InfoResponse::default()))
            }
        })?;
        Ok(())
    }
}

/// Started server with one slow request in flight on the gateway.
async fn server_with_request_in_flight(
    harness: &Harness,
) -> (Server, JoinHandle<reqwest::Result<reqwest::Response>>) {
    let entered = Arc::new(Notify::new());
    let mut server = harness.server_with_routes(Arc::new(SlowRoute {
        entered: Arc::clone(&entered),
    }));
    server.start().await.unwrap();

    let request = tokio::spawn(
        harness
            .https_client()
            .get(gateway_url(&server, SLOW_PATH))
            .send(),
    );
    entered.notified().await;
    (server, request)
}

#[tokio::test]
async fn gateway_drain_is_bounded() {
    let harness = Harness::new();
    let (mut server, request) = server_with_request_in_flight(&harness).await;

    let started = Instant::now();
    let errors = server.stop().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(elapsed >= GATEWAY_SHUTDOWN_TIMEOUT, "stopped after {elapsed:?}");
    assert!(
        elapsed < GATEWAY_SHUTDOWN_TIMEOUT + Duration::from_secs(3),
        "stopped after {elapsed:?}"
    );
    assert!(matches!(
        errors.errors(),
        [ShutdownError::Timeout {
            listener: Listener::Gateway,
            timeout,
        }] if *timeout == GATEWAY_SHUTDOWN_TIMEOUT
    ));
    assert_eq!(server.state(), State::Stopped);
    request.abort();
}

#[tokio::test]
async fn cancelled_context_cuts_gateway_drain_short() {
    let harness = Harness::new();
    let (mut server, request) = server_with_request_in_flight(&harness).await;

    let context = server.context().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        context.cancel();
    });

    let started = Instant::now();
    server.stop().await.unwrap();

    assert!(started.elapsed() < GATEWAY_SHUTDOWN_TIMEOUT);
    assert_eq!(server.state(), State::Stopped);
    request.abort();
}

#[tokio::test]
async fn not_serving_is_reported_while_listeners_still_serve() {
    let harness = Harness::new();
    let (mut server, request) = server_with_request_in_flight(&harness).await;
    let grpc = server.local_addr(Listener::Grpc).unwrap();

    let mut watch = health_watch(&server).await;
    assert_eq!(next_status(&mut watch).await, ServingStatus::Serving);

    // The watch stream is dropped inside the observer so the health listener can drain.
    let in_flight = &request;
    let observer = async move {
        let status = next_status(&mut watch).await;
        let request_pending = !in_flight.is_finished();
        let grpc_accepting = accepting(grpc).await;
        drop(watch);
        (status, request_pending, grpc_accepting)
    };

    let (stopped, (status, request_pending, grpc_accepting)) =
        tokio::join!(server.stop(), observer);
    request.abort();

    assert_eq!(status, ServingStatus::NotServing);
    assert!(request_pending, "gateway request ended before NOT_SERVING");
    assert!(grpc_accepting, "RPC listener closed before NOT_SERVING");
    assert!(stopped.is_err());
}
