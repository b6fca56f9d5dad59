//! Typed access to the shared instance registry.
//!
//! The registry is a Redis store holding one list per service type under
//! `service:<T>`. Instance lists are re-fetched on every call and never
//! cached here; the data path degrades to an empty list whenever the store
//! is unreachable.

use crate::config::ServiceType;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Base delay multiplied by the attempt number while reconnecting.
const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(100);
/// Upper bound on a single reconnect delay.
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(3);
/// Attempts per reconnect round before backing off for a cooldown.
const RECONNECT_MAX_ATTEMPTS: u32 = 10;
/// Pause between reconnect rounds once a round has been exhausted.
const RECONNECT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),
    #[error("invalid registry URL: {0}")]
    InvalidUrl(#[from] redis::RedisError),
}

/// Read/write interface to the instance registry.
///
/// The trait seam lets handlers and tests inject an in-memory registry in
/// place of the Redis-backed one.
#[async_trait]
pub trait InstanceRegistry: Send + Sync {
    /// Returns the current instance list for a service type, in registry
    /// order. Returns an empty list when the store is unreachable.
    async fn list_instances(&self, service: ServiceType) -> Vec<String>;

    /// Prepends `host` to the service type's instance list.
    async fn register_instance(&self, service: ServiceType, host: &str)
    -> Result<(), RegistryError>;

    /// Whether the registry connection is currently established.
    fn is_connected(&self) -> bool;
}

/// Redis-backed registry client.
///
/// Construction never blocks: the connection is established by a background
/// task with bounded backoff, and every command failure marks the client
/// disconnected and restarts that task.
#[derive(Clone)]
pub struct RedisRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    client: redis::Client,
    conn: RwLock<Option<MultiplexedConnection>>,
    connected: AtomicBool,
    reconnecting: AtomicBool,
}

impl RedisRegistry {
    /// Creates the client and spawns the initial connect task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(redis_url: &str) -> Result<Self, RegistryError> {
        let client = redis::Client::open(redis_url)?;
        let registry = Self {
            inner: Arc::new(RegistryInner {
                client,
                conn: RwLock::new(None),
                connected: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
            }),
        };
        registry.spawn_reconnect();
        Ok(registry)
    }

    /// Starts the background reconnect loop unless one is already running.
    fn spawn_reconnect(&self) {
        if self.inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                for attempt in 1..=RECONNECT_MAX_ATTEMPTS {
                    match inner.client.get_multiplexed_async_connection().await {
                        Ok(conn) => {
                            *inner.conn.write().await = Some(conn);
                            inner.connected.store(true, Ordering::SeqCst);
                            inner.reconnecting.store(false, Ordering::SeqCst);
                            info!("Connected to registry");
                            return;
                        }
                        Err(e) => {
                            warn!(
                                "Registry connection attempt {}/{} failed: {}",
                                attempt, RECONNECT_MAX_ATTEMPTS, e
                            );
                            let delay = (RECONNECT_BASE_DELAY * attempt).min(RECONNECT_MAX_DELAY);
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
                warn!(
                    "Registry unreachable after {} attempts, cooling down for {:?}",
                    RECONNECT_MAX_ATTEMPTS, RECONNECT_COOLDOWN
                );
                tokio::time::sleep(RECONNECT_COOLDOWN).await;
            }
        });
    }

    async fn connection(&self) -> Option<MultiplexedConnection> {
        self.inner.conn.read().await.clone()
    }

    /// Drops the broken connection and kicks off a new reconnect round.
    async fn mark_disconnected(&self) {
        *self.inner.conn.write().await = None;
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            warn!("Lost registry connection");
        }
        self.spawn_reconnect();
    }
}

#[async_trait]
impl InstanceRegistry for RedisRegistry {
    async fn list_instances(&self, service: ServiceType) -> Vec<String> {
        let Some(mut conn) = self.connection().await else {
            warn!(
                "Registry disconnected, returning empty list for {}",
                service.display_name()
            );
            return Vec::new();
        };
        match conn
            .lrange::<_, Vec<String>>(service.registry_key(), 0, -1)
            .await
        {
            Ok(instances) => instances,
            Err(e) => {
                warn!(
                    "Failed to read instance list for {}: {}",
                    service.display_name(),
                    e
                );
                self.mark_disconnected().await;
                Vec::new()
            }
        }
    }

    async fn register_instance(
        &self,
        service: ServiceType,
        host: &str,
    ) -> Result<(), RegistryError> {
        let Some(mut conn) = self.connection().await else {
            return Err(RegistryError::Unavailable(
                "registry disconnected".to_string(),
            ));
        };
        match conn.lpush::<_, _, ()>(service.registry_key(), host).await {
            Ok(()) => {
                info!("Registered instance {} for {}", host, service.display_name());
                Ok(())
            }
            Err(e) => {
                self.mark_disconnected().await;
                Err(RegistryError::Unavailable(e.to_string()))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}
