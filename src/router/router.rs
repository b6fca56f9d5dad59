use crate::app::AppState;
use crate::config::ServiceType;
use crate::middleware::track_http_metrics;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::routing::{any, get, post};
use axum::{Router, middleware};
use tower_http::trace::TraceLayer;

use super::health::gateway_status;
use super::metrics::metrics_exposition;
use super::register::register_instance;

/// Creates the gateway routes.
///
/// Only the proxied prefixes reach the request core; `/ping`, `/metrics`
/// and registration never pass through the admission limiter.
pub fn create_app_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(gateway_status))
        .route("/metrics", get(metrics_exposition))
        .route("/sA/register", post(register_instance))
        .route("/sA/api/users/auth/{*rest}", any(proxy_service_a))
        .route("/sB/{*rest}", any(proxy_service_b))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            track_http_metrics,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn proxy_service_a(State(state): State<AppState>, request: Request) -> Response {
    state.handler.handle(ServiceType::A, request).await
}

async fn proxy_service_b(State(state): State<AppState>, request: Request) -> Response {
    state.handler.handle(ServiceType::B, request).await
}
