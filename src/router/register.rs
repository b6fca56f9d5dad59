//! Instance registration endpoint.

use crate::app::AppState;
use crate::config::ServiceType;
use crate::relay::handler::error_response;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    host: Option<String>,
    #[serde(rename = "serviceType")]
    service_type: Option<String>,
}

/// `POST /sA/register` - prepends an instance to its service type's list.
pub async fn register_instance(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    let Some(host) = request.host.filter(|host| !host.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing field 'host'".to_string());
    };
    let Some(raw_type) = request.service_type.filter(|raw| !raw.is_empty()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing field 'serviceType'".to_string(),
        );
    };
    let service: ServiceType = match raw_type.parse() {
        Ok(service) => service,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("{}", e)),
    };

    match state.registry.register_instance(service, &host).await {
        Ok(()) => Json(json!({ "status": "registered" })).into_response(),
        Err(e) => {
            error!("Failed to register {} for {}: {}", host, service.display_name(), e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
