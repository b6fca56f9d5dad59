use crate::config::{GatewayConfig, load_config};
use crate::loadbalance::{AdmissionLimiter, CircuitBreakers, HealthMonitor, InstanceSelector, LoadSampler};
use crate::observability::PrometheusMetrics;
use crate::registry::{InstanceRegistry, RedisRegistry};
use crate::relay::{Forwarder, ProxyHandler};
use crate::router::create_app_router;

use anyhow::Result;
use axum::Router;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Memoized `/ping` payload with its build time.
pub type StatusCache = Arc<Mutex<Option<(Instant, Value)>>>;

/// Long-lived gateway state owned by the process entry point and shared
/// with every handler. No module-level singletons.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<dyn InstanceRegistry>,
    pub monitor: Arc<HealthMonitor>,
    pub breakers: Arc<CircuitBreakers>,
    pub admission: Arc<AdmissionLimiter>,
    pub handler: Arc<ProxyHandler>,
    pub metrics: Arc<PrometheusMetrics>,
    pub status_cache: StatusCache,
}

impl AppState {
    /// Builds the state against the configured Redis registry.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let registry = RedisRegistry::connect(&config.redis_url)?;
        Self::with_registry(config, Arc::new(registry))
    }

    /// Builds the state with an injected registry implementation.
    pub fn with_registry(
        config: GatewayConfig,
        registry: Arc<dyn InstanceRegistry>,
    ) -> Result<Self> {
        let metrics = Arc::new(PrometheusMetrics::new()?);
        let breakers = Arc::new(CircuitBreakers::new(&config, metrics.clone()));
        let admission = AdmissionLimiter::new(config.max_concurrent_requests, metrics.clone());
        let monitor = HealthMonitor::new(&config, registry.clone(), metrics.clone())?;
        let sampler = Arc::new(LoadSampler::new(&config)?);
        let selector = Arc::new(InstanceSelector::new(
            &config,
            registry.clone(),
            monitor.clone(),
            sampler,
        ));
        let forwarder = Forwarder::new(&config)?;
        let handler = Arc::new(ProxyHandler::new(
            registry.clone(),
            breakers.clone(),
            selector,
            forwarder,
            admission.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            registry,
            monitor,
            breakers,
            admission,
            handler,
            metrics,
            status_cache: Arc::new(Mutex::new(None)),
        })
    }
}

/// Creates the gateway application router.
pub fn create_app(state: AppState) -> Router {
    create_app_router(state)
}

/// Starts the gateway server and blocks until shutdown.
pub async fn start_server() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = load_config();
    info!("Starting API gateway on port {}", config.port);

    let state = AppState::new(config)?;
    let health_task = state.monitor.spawn();
    let app = create_app(state.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", state.config.port)).await?;
    info!("Gateway listening on http://{}", listener.local_addr()?);
    info!("Available endpoints:");
    info!("  GET  /ping                    - Aggregated gateway status");
    info!("  GET  /metrics                 - Prometheus metrics");
    info!("  POST /sA/register             - Instance registration");
    info!("  ALL  /sA/api/users/auth/*     - Proxied to serviceA");
    info!("  ALL  /sB/*                    - Proxied to serviceB");

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Shutdown signal received");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // In-flight forwards have run to their deadline by now; abandon any
    // probes the monitor still has in the air.
    health_task.abort();
    info!("Gateway shutdown complete");
    Ok(())
}
