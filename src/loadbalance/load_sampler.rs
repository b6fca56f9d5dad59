//! On-demand scraping of per-instance load metrics.

use crate::config::{GatewayConfig, ServiceType};
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;

/// Freshness-stamped load reading for one instance.
#[derive(Debug, Clone, Copy)]
pub struct LoadSample {
    pub requests_per_second: f64,
    pub sampled_at: Instant,
}

/// Subset of the backend `/metrics` payload the gateway cares about.
#[derive(Debug, Deserialize)]
struct BackendMetrics {
    #[serde(rename = "requestsPerSecond")]
    requests_per_second: f64,
}

pub struct LoadSampler {
    client: Client,
    backend_rest_port: u16,
    critical_load_threshold: f64,
    samples: RwLock<HashMap<String, LoadSample>>,
}

impl LoadSampler {
    pub fn new(config: &GatewayConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.server_timeout)
            .connect_timeout(config.server_timeout)
            .build()?;
        Ok(Self {
            client,
            backend_rest_port: config.backend_rest_port,
            critical_load_threshold: config.critical_load_threshold,
            samples: RwLock::new(HashMap::new()),
        })
    }

    /// Scrapes the instance's metrics endpoint and refreshes its entry.
    ///
    /// Any failure (connect, timeout, bad status, malformed body) returns
    /// `None`; the caller must treat the load as unknown.
    pub async fn sample_load(&self, service: ServiceType, instance: &str) -> Option<LoadSample> {
        let url = format!("http://{}:{}/metrics", instance, self.backend_rest_port);
        let metrics = match self.fetch_metrics(&url).await {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(
                    "Load sample for {} instance {} failed: {}",
                    service.display_name(),
                    instance,
                    e
                );
                return None;
            }
        };

        if metrics.requests_per_second > self.critical_load_threshold {
            warn!(
                "Instance {} load {:.1} rps exceeds critical threshold {:.1}",
                instance, metrics.requests_per_second, self.critical_load_threshold
            );
        }

        let sample = LoadSample {
            requests_per_second: metrics.requests_per_second,
            sampled_at: Instant::now(),
        };
        self.samples.write().insert(instance.to_string(), sample);
        Some(sample)
    }

    async fn fetch_metrics(&self, url: &str) -> Result<BackendMetrics, anyhow::Error> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("unexpected status {}", response.status());
        }
        Ok(response.json::<BackendMetrics>().await?)
    }

    /// Returns the instance's sample if it is younger than `max_age`.
    /// Older samples count as "load unknown" and are never consulted.
    pub fn recent_load(&self, instance: &str, max_age: Duration) -> Option<LoadSample> {
        self.samples
            .read()
            .get(instance)
            .filter(|sample| sample.sampled_at.elapsed() <= max_age)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use serde_json::json;

    fn sampler(port: u16) -> LoadSampler {
        let config = GatewayConfig {
            backend_rest_port: port,
            server_timeout: Duration::from_millis(300),
            ..GatewayConfig::default()
        };
        LoadSampler::new(&config).unwrap()
    }

    #[tokio::test]
    async fn parses_requests_per_second_and_caches_the_sample() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route(
            "/metrics",
            axum::routing::get(|| async {
                Json(json!({"requestsPerSecond": 12.5, "totalRequests": 4000}))
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let sampler = sampler(addr.port());
        let sample = sampler
            .sample_load(ServiceType::A, "127.0.0.1")
            .await
            .unwrap();
        assert_eq!(sample.requests_per_second, 12.5);

        let cached = sampler
            .recent_load("127.0.0.1", Duration::from_secs(1))
            .unwrap();
        assert_eq!(cached.requests_per_second, 12.5);
        // A zero freshness bound makes the same sample unknown again.
        assert!(sampler.recent_load("127.0.0.1", Duration::ZERO).is_none());
    }

    #[tokio::test]
    async fn scrape_failure_returns_none() {
        let sampler = sampler(1);
        assert!(sampler.sample_load(ServiceType::B, "127.0.0.1").await.is_none());
        assert!(sampler.recent_load("127.0.0.1", Duration::from_secs(1)).is_none());
    }

    #[tokio::test]
    async fn malformed_body_returns_none() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new()
            .route("/metrics", axum::routing::get(|| async { "not json" }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let sampler = sampler(addr.port());
        assert!(sampler.sample_load(ServiceType::A, "127.0.0.1").await.is_none());
    }
}
