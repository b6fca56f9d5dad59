use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Interval between health monitor cycles.
pub const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Window in which reroutes count as consecutive for the circuit breaker.
pub const REROUTE_WINDOW: Duration = Duration::from_millis(5000);

/// How long an aggregated `/ping` response stays memoized.
pub const STATUS_CACHE_TTL: Duration = Duration::from_secs(10);

/// A logical backend identity. All instances of a type are interchangeable.
///
/// The set of recognized types is fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    A,
    B,
}

impl ServiceType {
    pub const ALL: [ServiceType; 2] = [ServiceType::A, ServiceType::B];

    /// Short identifier used in registration payloads and metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            ServiceType::A => "A",
            ServiceType::B => "B",
        }
    }

    /// List key under which the registry stores this type's instances.
    pub fn registry_key(&self) -> String {
        format!("service:{}", self.label())
    }

    /// Name used in client-facing messages and the status endpoint.
    pub fn display_name(&self) -> String {
        format!("service{}", self.label())
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ServiceType {
    type Err = UnknownServiceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(ServiceType::A),
            "B" => Ok(ServiceType::B),
            other => Err(UnknownServiceType(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown service type '{0}'")]
pub struct UnknownServiceType(pub String);

/// Immutable gateway configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway listen port.
    pub port: u16,
    /// Registry URL.
    pub redis_url: String,
    /// REST port the backend instances listen on.
    pub backend_rest_port: u16,
    /// Hard deadline for every outbound HTTP call.
    pub server_timeout: Duration,
    /// Admission cap for in-flight forwarded requests.
    pub max_concurrent_requests: usize,
    /// Failures within the error window that trip a breaker.
    pub error_threshold: u32,
    /// Failure accumulation window and OPEN dwell. Shared on purpose.
    pub error_timeout: Duration,
    /// Requests-per-second level above which a load sample is logged.
    pub critical_load_threshold: f64,
    /// Consecutive reroutes that trip a breaker.
    pub reroute_threshold: u32,
    /// Shared token attached to forwarded requests as `X-Gateway-Token`.
    pub gateway_secret: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            redis_url: "redis://localhost:6379".to_string(),
            backend_rest_port: 5000,
            server_timeout: Duration::from_millis(5000),
            max_concurrent_requests: 100,
            error_threshold: 3,
            error_timeout: Duration::from_millis(17_500),
            critical_load_threshold: 60.0,
            reroute_threshold: 2,
            gateway_secret: "test123".to_string(),
        }
    }
}
