//! API Gateway
//!
//! This library provides the request-path core of the gateway:
//! - Dynamic instance discovery through a shared Redis registry
//! - Continuous health monitoring of registered instances
//! - Load-aware instance selection
//! - Per-service circuit breaking
//! - Concurrency admission control
//! - Request forwarding with Prometheus observability

pub mod app;
pub mod config;
pub mod loadbalance;
pub mod middleware;
pub mod observability;
pub mod registry;
pub mod relay;
pub mod router;

pub use app::{create_app, start_server, AppState};
