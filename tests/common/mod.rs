//! Shared fixtures for the gateway integration tests.

use api_gateway::config::{GatewayConfig, ServiceType};
use api_gateway::registry::{InstanceRegistry, RegistryError};
use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// In-memory stand-in for the Redis registry.
pub struct MemoryRegistry {
    lists: RwLock<HashMap<ServiceType, Vec<String>>>,
    connected: AtomicBool,
}

impl MemoryRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lists: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(true),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl InstanceRegistry for MemoryRegistry {
    async fn list_instances(&self, service: ServiceType) -> Vec<String> {
        if !self.connected.load(Ordering::SeqCst) {
            return Vec::new();
        }
        self.lists.read().get(&service).cloned().unwrap_or_default()
    }

    async fn register_instance(
        &self,
        service: ServiceType,
        host: &str,
    ) -> Result<(), RegistryError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("store offline".to_string()));
        }
        self.lists
            .write()
            .entry(service)
            .or_default()
            .insert(0, host.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// One observed forward: path, headers and body as the backend saw them.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Scriptable loopback backend the gateway forwards to.
pub struct TestBackend {
    pub addr: SocketAddr,
    pub status: Arc<Mutex<StatusCode>>,
    pub delay: Arc<Mutex<Duration>>,
    pub hits: Arc<AtomicUsize>,
    pub seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl TestBackend {
    pub fn set_status(&self, status: StatusCode) {
        *self.status.lock() = status;
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct BackendState {
    status: Arc<Mutex<StatusCode>>,
    delay: Arc<Mutex<Duration>>,
    hits: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    body: &'static str,
}

async fn echo(State(state): State<BackendState>, request: Request) -> impl IntoResponse {
    let path = request.uri().path().to_string();
    let headers = request.headers().clone();
    let body = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .unwrap_or_default();
    state.seen.lock().push(SeenRequest { path, headers, body });
    state.hits.fetch_add(1, Ordering::SeqCst);

    let delay = *state.delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let status = *state.status.lock();
    (
        status,
        [("x-backend", "test"), ("content-type", "application/json")],
        state.body,
    )
}

/// Spawns a backend that answers every route, including `/metrics`.
pub async fn spawn_backend(body: &'static str) -> TestBackend {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let state = BackendState {
        status: Arc::new(Mutex::new(StatusCode::OK)),
        delay: Arc::new(Mutex::new(Duration::ZERO)),
        hits: Arc::new(AtomicUsize::new(0)),
        seen: Arc::new(Mutex::new(Vec::new())),
        body,
    };
    let backend = TestBackend {
        addr,
        status: state.status.clone(),
        delay: state.delay.clone(),
        hits: state.hits.clone(),
        seen: state.seen.clone(),
    };

    let app = Router::new()
        .route(
            "/metrics",
            axum::routing::get(|| async { axum::Json(json!({"requestsPerSecond": 1.0})) }),
        )
        .fallback(echo)
        .with_state(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    backend
}

/// Gateway config pointed at a loopback backend port, with a short outbound
/// deadline so failure paths resolve quickly.
pub fn test_config(backend_rest_port: u16) -> GatewayConfig {
    GatewayConfig {
        backend_rest_port,
        server_timeout: Duration::from_millis(500),
        ..GatewayConfig::default()
    }
}
