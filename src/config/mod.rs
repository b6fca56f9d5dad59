pub mod loader;
pub mod model;

pub use loader::load_config;
pub use model::{GatewayConfig, ServiceType, HEALTH_INTERVAL, REROUTE_WINDOW, STATUS_CACHE_TTL};
