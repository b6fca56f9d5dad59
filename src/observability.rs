//! Prometheus metrics for the gateway.
//!
//! All metrics live in one registry owned by the process state and are
//! exposed through `GET /metrics` in the text exposition format.

use crate::config::ServiceType;
use crate::loadbalance::circuit_breaker::BreakerState;
use prometheus::{
    GaugeVec, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Prometheus metrics collector.
pub struct PrometheusMetrics {
    pub registry: Registry,
    pub http_request_duration_seconds: HistogramVec,
    pub service_health_status: GaugeVec,
    pub active_connections: IntGauge,
    pub circuit_breaker_status: GaugeVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Duration of HTTP requests in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0]),
            &["method", "route", "status_code"],
        )?;

        let service_health_status = GaugeVec::new(
            Opts::new(
                "service_health_status",
                "Health status of backend instances (1 = healthy, 0 = unhealthy)",
            ),
            &["service"],
        )?;

        let active_connections = IntGauge::new(
            "active_connections",
            "Number of requests currently being forwarded",
        )?;

        let circuit_breaker_status = GaugeVec::new(
            Opts::new(
                "circuit_breaker_status",
                "Circuit breaker state per service (0 = closed, 1 = open, 2 = half-open)",
            ),
            &["service"],
        )?;

        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(service_health_status.clone()))?;
        registry.register(Box::new(active_connections.clone()))?;
        registry.register(Box::new(circuit_breaker_status.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            http_request_duration_seconds,
            service_health_status,
            active_connections,
            circuit_breaker_status,
        })
    }

    /// Records one completed inbound HTTP request.
    pub fn observe_request(&self, method: &str, route: &str, status_code: u16, duration: Duration) {
        self.http_request_duration_seconds
            .with_label_values(&[method, route, &status_code.to_string()])
            .observe(duration.as_secs_f64());
    }

    /// Publishes the probe result for one `(service, instance)` pair.
    pub fn set_instance_health(&self, service: ServiceType, instance: &str, healthy: bool) {
        self.service_health_status
            .with_label_values(&[&format!("{}-{}", service.label(), instance)])
            .set(if healthy { 1.0 } else { 0.0 });
    }

    /// Mirrors the admission counter into the `active_connections` gauge.
    pub fn set_active_connections(&self, count: usize) {
        self.active_connections.set(count as i64);
    }

    /// Publishes a breaker state change.
    pub fn set_breaker_state(&self, service: ServiceType, state: BreakerState) {
        self.circuit_breaker_status
            .with_label_values(&[&service.display_name()])
            .set(state.gauge_value());
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
