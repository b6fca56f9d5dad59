//! The end-to-end request path: admission, breaker gate, selection,
//! forward, outcome accounting.

use crate::config::ServiceType;
use crate::loadbalance::{AdmissionLimiter, CircuitBreakers, DispatchGate, InstanceSelector};
use crate::registry::InstanceRegistry;
use crate::relay::forwarder::{ForwardOutcome, Forwarder, filter_response_headers};
use axum::Json;
use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{error, warn};

pub struct ProxyHandler {
    registry: Arc<dyn InstanceRegistry>,
    breakers: Arc<CircuitBreakers>,
    selector: Arc<InstanceSelector>,
    forwarder: Forwarder,
    admission: Arc<AdmissionLimiter>,
}

impl ProxyHandler {
    pub fn new(
        registry: Arc<dyn InstanceRegistry>,
        breakers: Arc<CircuitBreakers>,
        selector: Arc<InstanceSelector>,
        forwarder: Forwarder,
        admission: Arc<AdmissionLimiter>,
    ) -> Self {
        Self {
            registry,
            breakers,
            selector,
            forwarder,
            admission,
        }
    }

    /// Routes one client request to an instance of `service`.
    ///
    /// The admission permit is held for the whole request and released on
    /// every exit path; the breaker gate is taken exactly once.
    pub async fn handle(&self, service: ServiceType, request: Request) -> Response {
        let _permit = match self.admission.acquire() {
            Ok(permit) => permit,
            Err(rejected) => {
                warn!("Admission limiter at capacity, rejecting request");
                return error_response(StatusCode::SERVICE_UNAVAILABLE, rejected.to_string());
            }
        };

        let gate = match self.breakers.check_dispatch(service) {
            Ok(gate) => gate,
            Err(open) => {
                return error_response(StatusCode::SERVICE_UNAVAILABLE, open.to_string());
            }
        };
        if gate == DispatchGate::Probe {
            self.breakers.record_reroute(service);
        }

        let Some(instance) = self.selector.select(service).await else {
            let detail = if self.registry.is_connected() {
                format!("No available instances for {}", service.display_name())
            } else {
                format!(
                    "{} is not available or Redis is disconnected",
                    service.display_name()
                )
            };
            return error_response(StatusCode::SERVICE_UNAVAILABLE, detail);
        };

        let (parts, body) = request.into_parts();
        let body = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read request body: {}", e),
                );
            }
        };
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let outcome = self
            .forwarder
            .forward(&instance, parts.method, path_and_query, &parts.headers, body)
            .await;

        // Exactly one success-or-failure record per forward.
        match outcome {
            ForwardOutcome::Completed {
                status,
                headers,
                body,
            } => {
                if status.is_server_error() {
                    self.breakers.record_failure(service);
                } else {
                    self.breakers.record_success(service);
                }
                relay_response(status, &headers, body)
            }
            ForwardOutcome::TimedOut => {
                self.breakers.record_failure(service);
                warn!(
                    "Forward to {} instance {} timed out",
                    service.display_name(),
                    instance
                );
                error_response(StatusCode::GATEWAY_TIMEOUT, "Request timed out".to_string())
            }
            ForwardOutcome::TransportError { status, detail } => {
                self.breakers.record_failure(service);
                error!(
                    "Forward to {} instance {} failed: {}",
                    service.display_name(),
                    instance,
                    detail
                );
                error_response(status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), detail)
            }
        }
    }
}

/// Builds the JSON error shape every gateway-originated failure uses.
pub fn error_response(status: StatusCode, detail: String) -> Response {
    (status, Json(serde_json::json!({ "detail": detail }))).into_response()
}

/// Relays a backend response unchanged apart from hop-by-hop headers.
fn relay_response(status: StatusCode, headers: &axum::http::HeaderMap, body: bytes::Bytes) -> Response {
    let mut builder = Response::builder().status(status);
    if let Some(outbound) = builder.headers_mut() {
        outbound.extend(filter_response_headers(headers));
    }
    match builder.body(Body::from(body)) {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to assemble relayed response: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
