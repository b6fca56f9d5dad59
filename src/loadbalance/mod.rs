pub mod admission;
pub mod circuit_breaker;
pub mod health_checker;
pub mod load_sampler;
pub mod selector;

pub use admission::{AdmissionLimiter, AdmissionPermit, AdmissionRejected};
pub use circuit_breaker::{BreakerOpen, BreakerSnapshot, BreakerState, CircuitBreakers, DispatchGate};
pub use health_checker::{HealthMonitor, ProbeResult};
pub use load_sampler::{LoadSample, LoadSampler};
pub use selector::InstanceSelector;
