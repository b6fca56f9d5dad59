//! Periodic liveness probing of every registered instance.
//!
//! The monitor runs as a background task ticking every `HEALTH_INTERVAL`.
//! Each cycle re-fetches the instance lists, probes `/ping` on every
//! instance concurrently and publishes the results to the shared health
//! view and the `service_health_status` gauge.

use crate::config::{GatewayConfig, HEALTH_INTERVAL, ServiceType};
use crate::observability::PrometheusMetrics;
use crate::registry::InstanceRegistry;
use parking_lot::RwLock;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Result of the most recent probe for one `(service, instance)` pair.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub healthy: bool,
    pub error: Option<String>,
}

type HealthView = RwLock<HashMap<(ServiceType, String), ProbeResult>>;

pub struct HealthMonitor {
    registry: Arc<dyn InstanceRegistry>,
    client: Client,
    view: HealthView,
    metrics: Arc<PrometheusMetrics>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(
        config: &GatewayConfig,
        registry: Arc<dyn InstanceRegistry>,
        metrics: Arc<PrometheusMetrics>,
    ) -> Result<Arc<Self>, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.server_timeout)
            .connect_timeout(config.server_timeout)
            .build()?;
        Ok(Arc::new(Self {
            registry,
            client,
            view: RwLock::new(HashMap::new()),
            metrics,
            interval: HEALTH_INTERVAL,
        }))
    }

    /// Spawns the monitor loop. Aborting the returned handle abandons any
    /// in-flight probes, which is the intended shutdown behavior.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            info!("Starting health monitor with interval {:?}", monitor.interval);
            let mut ticker = tokio::time::interval(monitor.interval);
            // An overrunning cycle must not queue extra cycles behind it;
            // the next one starts as soon as the late tick is observed.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.run_cycle().await;
            }
        })
    }

    /// Probes every instance of every recognized service type once.
    pub async fn run_cycle(&self) {
        let mut tasks = Vec::new();
        for service in ServiceType::ALL {
            let instances = self.registry.list_instances(service).await;
            for instance in instances {
                let client = self.client.clone();
                tasks.push(tokio::spawn(async move {
                    let result = Self::probe(&client, &instance).await;
                    (service, instance, result)
                }));
            }
        }

        let probed = tasks.len();
        for task in tasks {
            match task.await {
                Ok((service, instance, result)) => self.record(service, instance, result),
                Err(e) => error!("Health probe task failed: {}", e),
            }
        }
        debug!("Health cycle complete, probed {} instances", probed);
    }

    async fn probe(client: &Client, instance: &str) -> ProbeResult {
        let url = format!("http://{}/ping", instance);
        match client.get(&url).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => ProbeResult {
                healthy: true,
                error: None,
            },
            Ok(response) => ProbeResult {
                healthy: false,
                error: Some(format!("unexpected status {}", response.status())),
            },
            Err(e) => ProbeResult {
                healthy: false,
                error: Some(e.to_string()),
            },
        }
    }

    /// Writes one probe result; only the probe cycle records entries.
    pub(crate) fn record(&self, service: ServiceType, instance: String, result: ProbeResult) {
        self.metrics
            .set_instance_health(service, &instance, result.healthy);
        self.view
            .write()
            .insert((service, instance), result);
    }

    /// Last recorded health for an instance; unknown counts as unhealthy.
    pub fn is_healthy(&self, service: ServiceType, instance: &str) -> bool {
        self.view
            .read()
            .get(&(service, instance.to_string()))
            .is_some_and(|result| result.healthy)
    }

    /// Last probe result for an instance, if one was ever recorded.
    pub fn probe_result(&self, service: ServiceType, instance: &str) -> Option<ProbeResult> {
        self.view
            .read()
            .get(&(service, instance.to_string()))
            .cloned()
    }
}
