//! Per-service circuit breakers.
//!
//! Each service type owns exactly one breaker record for the lifetime of the
//! process. Failures and reroutes accrue independently; either can trip the
//! breaker. The error timeout doubles as the failure accumulation window and
//! the OPEN dwell time.

use crate::config::{GatewayConfig, REROUTE_WINDOW, ServiceType};
use crate::observability::PrometheusMetrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker state, encoded for the `circuit_breaker_status` gauge as
/// CLOSED=0, OPEN=1, HALF_OPEN=2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn gauge_value(&self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::Open => 1.0,
            BreakerState::HalfOpen => 2.0,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF-OPEN",
        })
    }
}

/// Outcome of the breaker gate for a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchGate {
    /// Normal dispatch, breaker closed or half-open.
    Admit,
    /// This request consumed the OPEN -> HALF_OPEN transition and probes the
    /// service on behalf of the breaker.
    Probe,
}

/// Dispatch was rejected because the breaker is open and still dwelling.
#[derive(Debug, thiserror::Error)]
#[error("{0} is currently unavailable (Circuit Breaker: OPEN)")]
pub struct BreakerOpen(pub String);

#[derive(Debug)]
struct BreakerRecord {
    state: BreakerState,
    failures: u32,
    last_failure_at: Option<Instant>,
    reroutes: u64,
    consecutive_reroutes: u32,
    last_reroute_at: Option<Instant>,
}

impl BreakerRecord {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: 0,
            last_failure_at: None,
            reroutes: 0,
            consecutive_reroutes: 0,
            last_reroute_at: None,
        }
    }
}

/// Point-in-time view of one breaker, used by the status endpoint.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failures: u32,
    pub reroutes: u64,
    pub consecutive_reroutes: u32,
}

/// The fixed set of per-service breakers.
///
/// Records are mutated only under their own lock; cross-service breakers do
/// not share locks. No lock is ever held across an await point.
pub struct CircuitBreakers {
    error_threshold: u32,
    error_timeout: Duration,
    reroute_threshold: u32,
    reroute_window: Duration,
    records: HashMap<ServiceType, Mutex<BreakerRecord>>,
    metrics: Arc<PrometheusMetrics>,
}

impl CircuitBreakers {
    pub fn new(config: &GatewayConfig, metrics: Arc<PrometheusMetrics>) -> Self {
        let records = ServiceType::ALL
            .into_iter()
            .map(|service| (service, Mutex::new(BreakerRecord::new())))
            .collect();
        let breakers = Self {
            error_threshold: config.error_threshold,
            error_timeout: config.error_timeout,
            reroute_threshold: config.reroute_threshold,
            reroute_window: REROUTE_WINDOW,
            records,
            metrics,
        };
        for service in ServiceType::ALL {
            breakers.metrics.set_breaker_state(service, BreakerState::Closed);
        }
        breakers
    }

    fn record(&self, service: ServiceType) -> &Mutex<BreakerRecord> {
        // Every recognized service type gets a record at construction.
        &self.records[&service]
    }

    /// The gate taken once per request before any routing work.
    ///
    /// An open breaker rejects until the dwell elapses; the first attempt
    /// after that moves the breaker to HALF_OPEN and proceeds as a probe.
    pub fn check_dispatch(&self, service: ServiceType) -> Result<DispatchGate, BreakerOpen> {
        let mut record = self.record(service).lock();
        match record.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(DispatchGate::Admit),
            BreakerState::Open => {
                let last_failure = record
                    .last_failure_at
                    .expect("open breaker always has a failure timestamp");
                if last_failure.elapsed() > self.error_timeout {
                    record.state = BreakerState::HalfOpen;
                    record.consecutive_reroutes = 0;
                    self.metrics.set_breaker_state(service, BreakerState::HalfOpen);
                    info!("Circuit breaker for {} is HALF-OPEN, probing", service.display_name());
                    Ok(DispatchGate::Probe)
                } else {
                    Err(BreakerOpen(service.display_name()))
                }
            }
        }
    }

    /// Records a successful forward (any non-5xx backend response).
    pub fn record_success(&self, service: ServiceType) {
        let mut record = self.record(service).lock();
        record.consecutive_reroutes = 0;
        if record.state == BreakerState::HalfOpen {
            record.state = BreakerState::Closed;
            record.failures = 0;
            record.last_failure_at = None;
            self.metrics.set_breaker_state(service, BreakerState::Closed);
            info!("Circuit breaker for {} is CLOSED again", service.display_name());
        }
    }

    /// Records a failed forward: transport error, timeout or 5xx.
    ///
    /// Failures outside the error window restart the count at one. The same
    /// rules apply in CLOSED and HALF_OPEN.
    pub fn record_failure(&self, service: ServiceType) {
        let mut record = self.record(service).lock();
        let now = Instant::now();
        let within_window = record
            .last_failure_at
            .is_some_and(|at| now.duration_since(at) <= self.error_timeout);
        record.failures = if within_window { record.failures + 1 } else { 1 };
        record.last_failure_at = Some(now);
        if record.failures >= self.error_threshold && record.state != BreakerState::Open {
            record.state = BreakerState::Open;
            self.metrics.set_breaker_state(service, BreakerState::Open);
            warn!(
                "Circuit breaker for {} is OPEN after {} failures",
                service.display_name(),
                record.failures
            );
        }
    }

    /// Records a reroute: a HALF_OPEN probe attempt, or any future
    /// additional forward for one logical request.
    pub fn record_reroute(&self, service: ServiceType) {
        let mut record = self.record(service).lock();
        let now = Instant::now();
        let window_expired = record
            .last_reroute_at
            .is_some_and(|at| now.duration_since(at) > self.reroute_window);
        if window_expired {
            record.consecutive_reroutes = 0;
        }
        record.reroutes += 1;
        record.consecutive_reroutes += 1;
        record.last_reroute_at = Some(now);
        if record.consecutive_reroutes >= self.reroute_threshold
            && record.state != BreakerState::Open
        {
            record.state = BreakerState::Open;
            record.last_failure_at = Some(now);
            self.metrics.set_breaker_state(service, BreakerState::Open);
            warn!(
                "Circuit breaker for {} is OPEN after {} consecutive reroutes",
                service.display_name(),
                record.consecutive_reroutes
            );
        }
    }

    pub fn state(&self, service: ServiceType) -> BreakerState {
        self.record(service).lock().state
    }

    pub fn snapshot(&self, service: ServiceType) -> BreakerSnapshot {
        let record = self.record(service).lock();
        BreakerSnapshot {
            state: record.state,
            failures: record.failures,
            reroutes: record.reroutes,
            consecutive_reroutes: record.consecutive_reroutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breakers_with(error_timeout: Duration) -> CircuitBreakers {
        let config = GatewayConfig {
            error_timeout,
            ..GatewayConfig::default()
        };
        CircuitBreakers::new(&config, Arc::new(PrometheusMetrics::new().unwrap()))
    }

    #[test]
    fn trips_open_at_threshold_within_window() {
        let breakers = breakers_with(Duration::from_secs(60));
        breakers.record_failure(ServiceType::A);
        breakers.record_failure(ServiceType::A);
        assert_eq!(breakers.state(ServiceType::A), BreakerState::Closed);
        breakers.record_failure(ServiceType::A);
        assert_eq!(breakers.state(ServiceType::A), BreakerState::Open);
        assert!(breakers.check_dispatch(ServiceType::A).is_err());
    }

    #[test]
    fn failures_outside_window_restart_the_count() {
        let breakers = breakers_with(Duration::from_millis(20));
        breakers.record_failure(ServiceType::A);
        breakers.record_failure(ServiceType::A);
        std::thread::sleep(Duration::from_millis(30));
        // The window expired, so this failure counts as the first of a run.
        breakers.record_failure(ServiceType::A);
        assert_eq!(breakers.state(ServiceType::A), BreakerState::Closed);
        assert_eq!(breakers.snapshot(ServiceType::A).failures, 1);
    }

    #[test]
    fn open_breaker_has_failure_timestamp_and_isolated_services() {
        let breakers = breakers_with(Duration::from_secs(60));
        for _ in 0..3 {
            breakers.record_failure(ServiceType::A);
        }
        assert_eq!(breakers.state(ServiceType::A), BreakerState::Open);
        // The other service's breaker is untouched.
        assert_eq!(breakers.state(ServiceType::B), BreakerState::Closed);
        assert!(breakers.check_dispatch(ServiceType::B).is_ok());
    }

    #[test]
    fn dwell_expiry_transitions_to_half_open_probe() {
        let breakers = breakers_with(Duration::from_millis(20));
        for _ in 0..3 {
            breakers.record_failure(ServiceType::A);
        }
        assert!(breakers.check_dispatch(ServiceType::A).is_err());
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(
            breakers.check_dispatch(ServiceType::A).unwrap(),
            DispatchGate::Probe
        );
        assert_eq!(breakers.state(ServiceType::A), BreakerState::HalfOpen);
        // Only the first attempt is the probe.
        assert_eq!(
            breakers.check_dispatch(ServiceType::A).unwrap(),
            DispatchGate::Admit
        );
    }

    #[test]
    fn half_open_success_closes_and_zeroes_counters() {
        let breakers = breakers_with(Duration::from_millis(20));
        for _ in 0..3 {
            breakers.record_failure(ServiceType::A);
        }
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(
            breakers.check_dispatch(ServiceType::A).unwrap(),
            DispatchGate::Probe
        );
        breakers.record_success(ServiceType::A);
        let snapshot = breakers.snapshot(ServiceType::A);
        assert_eq!(snapshot.state, BreakerState::Closed);
        assert_eq!(snapshot.failures, 0);
        assert_eq!(snapshot.consecutive_reroutes, 0);
    }

    #[test]
    fn consecutive_reroutes_trip_the_breaker() {
        let breakers = breakers_with(Duration::from_secs(60));
        breakers.record_reroute(ServiceType::B);
        assert_eq!(breakers.state(ServiceType::B), BreakerState::Closed);
        breakers.record_reroute(ServiceType::B);
        assert_eq!(breakers.state(ServiceType::B), BreakerState::Open);
        // Tripping by reroute still satisfies the OPEN invariant: the gate
        // can later move to HALF_OPEN off the recorded timestamp.
        assert!(breakers.check_dispatch(ServiceType::B).is_err());
    }

    #[test]
    fn success_resets_consecutive_reroutes() {
        let breakers = breakers_with(Duration::from_secs(60));
        breakers.record_reroute(ServiceType::B);
        breakers.record_success(ServiceType::B);
        breakers.record_reroute(ServiceType::B);
        assert_eq!(breakers.state(ServiceType::B), BreakerState::Closed);
        assert_eq!(breakers.snapshot(ServiceType::B).consecutive_reroutes, 1);
        // The monotonic diagnostic counter keeps counting.
        assert_eq!(breakers.snapshot(ServiceType::B).reroutes, 2);
    }

    #[test]
    fn reroutes_stop_being_consecutive_after_the_window() {
        let config = GatewayConfig::default();
        let breakers = CircuitBreakers {
            reroute_window: Duration::from_millis(20),
            ..CircuitBreakers::new(&config, Arc::new(PrometheusMetrics::new().unwrap()))
        };
        breakers.record_reroute(ServiceType::A);
        std::thread::sleep(Duration::from_millis(30));
        breakers.record_reroute(ServiceType::A);
        assert_eq!(breakers.state(ServiceType::A), BreakerState::Closed);
        assert_eq!(breakers.snapshot(ServiceType::A).consecutive_reroutes, 1);
    }
}
