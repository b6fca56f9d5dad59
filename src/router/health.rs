//! Aggregated gateway status endpoint.

use crate::app::AppState;
use crate::config::{STATUS_CACHE_TTL, ServiceType};
use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use serde_json::{Value, json};
use std::time::Instant;

/// `GET /ping` - aggregated health of the gateway and its services.
///
/// The response is memoized for ten seconds; within that window all callers
/// see the same snapshot.
pub async fn gateway_status(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(cached) = {
        let cache = state.status_cache.lock();
        cache
            .as_ref()
            .filter(|(at, _)| at.elapsed() <= STATUS_CACHE_TTL)
            .map(|(_, body)| body.clone())
    } {
        return Json(cached);
    }

    let body = build_status(&state).await;
    *state.status_cache.lock() = Some((Instant::now(), body.clone()));
    Json(body)
}

async fn build_status(state: &AppState) -> Value {
    let redis_connected = state.registry.is_connected();
    let mut services = serde_json::Map::new();
    let mut all_healthy = true;

    for service in ServiceType::ALL {
        let instances = state.registry.list_instances(service).await;
        let health_status: Vec<Value> = instances
            .iter()
            .map(|instance| {
                let probe = state.monitor.probe_result(service, instance);
                let healthy = probe.as_ref().is_some_and(|p| p.healthy);
                if !healthy {
                    all_healthy = false;
                }
                let mut entry = json!({
                    "ip": instance,
                    "status": if healthy { "healthy" } else { "unhealthy" },
                });
                if let Some(error) = probe.and_then(|p| p.error) {
                    entry["error"] = Value::String(error);
                }
                entry
            })
            .collect();

        services.insert(
            service.display_name(),
            json!({
                "instances": instances.len(),
                "circuitBreakerState": state.breakers.state(service).to_string(),
                "healthStatus": health_status,
            }),
        );
    }

    let status = if redis_connected && all_healthy {
        "healthy"
    } else {
        "unhealthy"
    };

    json!({
        "status": status,
        "timestamp": chrono::Utc::now().timestamp_millis(),
        "gateway": {
            "port": state.config.port,
            "concurrentRequests": state.admission.current(),
            "maxConcurrentRequests": state.admission.max_concurrent(),
            "redisConnected": redis_connected,
        },
        "services": Value::Object(services),
    })
}
