//! Load-aware instance selection.

use crate::config::{GatewayConfig, ServiceType};
use crate::loadbalance::health_checker::HealthMonitor;
use crate::loadbalance::load_sampler::LoadSampler;
use crate::registry::InstanceRegistry;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct InstanceSelector {
    registry: Arc<dyn InstanceRegistry>,
    monitor: Arc<HealthMonitor>,
    sampler: Arc<LoadSampler>,
    /// Samples older than this are treated as "load unknown"; the bound is
    /// the outbound deadline because every sample consulted here was taken
    /// within the current selection pass.
    sample_ttl: Duration,
}

impl InstanceSelector {
    pub fn new(
        config: &GatewayConfig,
        registry: Arc<dyn InstanceRegistry>,
        monitor: Arc<HealthMonitor>,
        sampler: Arc<LoadSampler>,
    ) -> Self {
        Self {
            registry,
            monitor,
            sampler,
            sample_ttl: config.server_timeout,
        }
    }

    /// Chooses the target instance for a service type.
    ///
    /// Returns `None` only when the registry has no instances at all. When
    /// every instance looks unhealthy the first registered instance is
    /// returned as a last resort, which preserves availability while the
    /// health view is stale or universally negative.
    pub async fn select(&self, service: ServiceType) -> Option<String> {
        let instances = self.registry.list_instances(service).await;
        if instances.is_empty() {
            return None;
        }

        let healthy: Vec<String> = instances
            .iter()
            .filter(|instance| self.monitor.is_healthy(service, instance))
            .cloned()
            .collect();

        if healthy.is_empty() {
            warn!(
                "No healthy instance for {}, falling back to first registered",
                service.display_name()
            );
            return instances.into_iter().next();
        }

        // Refresh every candidate's load concurrently before ranking.
        futures::future::join_all(
            healthy
                .iter()
                .map(|instance| self.sampler.sample_load(service, instance)),
        )
        .await;

        let candidates: Vec<(String, Option<f64>)> = healthy
            .into_iter()
            .map(|instance| {
                let load = self
                    .sampler
                    .recent_load(&instance, self.sample_ttl)
                    .map(|sample| sample.requests_per_second);
                (instance, load)
            })
            .collect();

        let choice = rank_by_load(candidates).into_iter().next();
        if let Some(ref instance) = choice {
            debug!("Selected {} instance {}", service.display_name(), instance);
        }
        choice
    }
}

/// Sorts candidates by effective load: known readings ascending, unknown
/// last. The sort is stable, so registry order breaks ties.
fn rank_by_load(mut candidates: Vec<(String, Option<f64>)>) -> Vec<String> {
    candidates.sort_by(|(_, a), (_, b)| match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    candidates.into_iter().map(|(instance, _)| instance).collect()
}
