use crate::config::model::GatewayConfig;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Loads the gateway configuration from environment variables.
///
/// Unset variables fall back to their documented defaults; values that fail
/// to parse are logged and replaced by the default as well.
pub fn load_config() -> GatewayConfig {
    let defaults = GatewayConfig::default();

    GatewayConfig {
        port: env_or("PORT", defaults.port),
        redis_url: std::env::var("SM_REDIS_URL").unwrap_or(defaults.redis_url),
        backend_rest_port: env_or("SERV_REST_PORT", defaults.backend_rest_port),
        server_timeout: Duration::from_millis(env_or(
            "SERVER_TIMEOUT_MS",
            defaults.server_timeout.as_millis() as u64,
        )),
        max_concurrent_requests: env_or("MAX_CONCURRENT_REQUESTS", defaults.max_concurrent_requests),
        error_threshold: env_or("ERROR_THRESHOLD", defaults.error_threshold),
        error_timeout: Duration::from_millis(env_or(
            "ERROR_TIMEOUT",
            defaults.error_timeout.as_millis() as u64,
        )),
        critical_load_threshold: env_or("CRITICAL_LOAD_THRESHOLD", defaults.critical_load_threshold),
        reroute_threshold: env_or("REROUTE_THRESHOLD", defaults.reroute_threshold),
        gateway_secret: std::env::var("GATEWAY_SECRET").unwrap_or(defaults.gateway_secret),
    }
}

fn env_or<T: FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Invalid value '{}' for {}, using default", raw, name);
                default
            }
        },
        Err(_) => default,
    }
}
