//! Process-wide concurrency admission control.
//!
//! A single atomic counter tracks in-flight forwarded requests. Acquisition
//! hands out an RAII permit so the decrement happens on every exit path.

use crate::observability::PrometheusMetrics;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Limiter at capacity; the request is rejected before any routing work.
#[derive(Debug, thiserror::Error)]
#[error("API Gateway is busy. Please try again later.")]
pub struct AdmissionRejected;

pub struct AdmissionLimiter {
    current: AtomicUsize,
    max_concurrent: usize,
    metrics: Arc<PrometheusMetrics>,
}

impl AdmissionLimiter {
    pub fn new(max_concurrent: usize, metrics: Arc<PrometheusMetrics>) -> Arc<Self> {
        Arc::new(Self {
            current: AtomicUsize::new(0),
            max_concurrent,
            metrics,
        })
    }

    /// Admits the request or rejects it at capacity.
    ///
    /// The compare-and-swap loop keeps the counter within
    /// `0..=max_concurrent` at every observable moment.
    pub fn acquire(self: &Arc<Self>) -> Result<AdmissionPermit, AdmissionRejected> {
        let result = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                (count < self.max_concurrent).then_some(count + 1)
            });
        match result {
            Ok(previous) => {
                self.metrics.set_active_connections(previous + 1);
                Ok(AdmissionPermit {
                    limiter: self.clone(),
                })
            }
            Err(_) => Err(AdmissionRejected),
        }
    }

    /// Number of requests currently in flight.
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    fn release(&self) {
        let previous = self.current.fetch_sub(1, Ordering::SeqCst);
        self.metrics.set_active_connections(previous - 1);
    }
}

/// RAII admission slot; dropping it releases the slot exactly once.
pub struct AdmissionPermit {
    limiter: Arc<AdmissionLimiter>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}
