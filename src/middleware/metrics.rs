//! HTTP request metrics middleware.

use crate::app::AppState;
use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;

/// Records every inbound request into `http_request_duration_seconds`.
///
/// The route label is the matched route pattern, not the raw path, so label
/// cardinality stays bounded under wildcard routes.
pub async fn track_http_metrics(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;

    state.metrics.observe_request(
        &method,
        &route,
        response.status().as_u16(),
        start.elapsed(),
    );
    response
}
