//! Admission limiter behavior at the gateway surface.

mod common;

use api_gateway::config::ServiceType;
use api_gateway::registry::InstanceRegistry;
use api_gateway::{AppState, create_app};
use axum::http::StatusCode;
use axum_test::TestServer;
use common::{MemoryRegistry, spawn_backend, test_config};
use serde_json::Value;
use std::time::Duration;

#[tokio::test]
async fn third_simultaneous_request_is_rejected_at_cap_two() {
    let backend = spawn_backend("ok").await;
    // Keep the first two requests in flight long enough to overlap.
    *backend.delay.lock() = Duration::from_millis(300);

    let registry = MemoryRegistry::new();
    registry
        .register_instance(ServiceType::A, "127.0.0.1")
        .await
        .unwrap();

    let mut config = test_config(backend.addr.port());
    config.max_concurrent_requests = 2;
    let state = AppState::with_registry(config, registry).unwrap();
    let server = TestServer::new(create_app(state.clone())).unwrap();

    let (first, second, third) = tokio::join!(
        server.get("/sA/api/users/auth/me"),
        server.get("/sA/api/users/auth/me"),
        server.get("/sA/api/users/auth/me"),
    );

    let statuses = [
        first.status_code(),
        second.status_code(),
        third.status_code(),
    ];
    let rejected = statuses
        .iter()
        .filter(|status| **status == StatusCode::SERVICE_UNAVAILABLE)
        .count();
    let forwarded = statuses
        .iter()
        .filter(|status| **status == StatusCode::OK)
        .count();
    assert_eq!(forwarded, 2);
    assert_eq!(rejected, 1);

    for response in [first, second, third] {
        if response.status_code() == StatusCode::SERVICE_UNAVAILABLE {
            assert_eq!(
                response.json::<Value>()["detail"],
                "API Gateway is busy. Please try again later."
            );
        }
    }

    // Every permit was released once the requests finished.
    assert_eq!(state.admission.current(), 0);
}

#[tokio::test]
async fn metrics_endpoint_bypasses_the_admission_limiter() {
    let backend = spawn_backend("ok").await;
    *backend.delay.lock() = Duration::from_millis(300);

    let registry = MemoryRegistry::new();
    registry
        .register_instance(ServiceType::A, "127.0.0.1")
        .await
        .unwrap();

    let mut config = test_config(backend.addr.port());
    config.max_concurrent_requests = 1;
    let state = AppState::with_registry(config, registry).unwrap();
    let server = TestServer::new(create_app(state)).unwrap();

    let (proxied, metrics) = tokio::join!(
        server.get("/sA/api/users/auth/me"),
        server.get("/metrics"),
    );
    assert_eq!(proxied.status_code(), StatusCode::OK);
    assert_eq!(metrics.status_code(), StatusCode::OK);
    assert!(metrics.text().contains("active_connections"));
}
