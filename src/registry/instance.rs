//! Service instance abstraction.
//!
//! # Responsibilities
//! - Represent a single instance of a logical service
//! - Track active connections (for Least Connections LB)
//! - Track health state (Healthy/Unhealthy/Unknown)
//! - Keep running request statistics (EWMA latency, totals)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Health status of an instance.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthStatus {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthStatus::Healthy,
            2 => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "unknown"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Weight of the newest sample in the response-time average.
const EWMA_ALPHA: f64 = 0.2;

/// A single instance of a logical service.
#[derive(Debug)]
pub struct ServiceInstance {
    /// Logical service name (e.g. "inventory").
    pub service: String,
    pub host: String,
    pub port: u16,
    /// Relative weight for weighted round robin (>= 1).
    pub weight: AtomicU32,
    /// Registration order within the registry, used for stable tie-breaks.
    pub seq: u64,

    /// Current health status (0=Unknown, 1=Healthy, 2=Unhealthy).
    state: AtomicU8,
    /// Number of in-flight calls.
    pub active_connections: AtomicUsize,
    /// Consecutive failed probes.
    pub consecutive_failures: AtomicU32,
    /// Consecutive successful probes.
    pub consecutive_successes: AtomicU32,

    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    /// Rolling average response time in microseconds, stored as f64 bits.
    avg_response_micros: AtomicU64,
}

impl ServiceInstance {
    /// Create a new instance with `Unknown` health.
    pub fn new(service: impl Into<String>, host: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            service: service.into(),
            host: host.into(),
            port,
            weight: AtomicU32::new(weight.max(1)),
            seq: 0,
            state: AtomicU8::new(HealthStatus::Unknown as u8),
            active_connections: AtomicUsize::new(0),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            avg_response_micros: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub(crate) fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    /// Identity within the service: `host:port`.
    pub fn instance_id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL used by HTTP transports and probes.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus::from(self.state.load(Ordering::Acquire))
    }

    /// Swap the health status, returning the previous one.
    pub(crate) fn set_status(&self, status: HealthStatus) -> HealthStatus {
        HealthStatus::from(self.state.swap(status as u8, Ordering::AcqRel))
    }

    /// Eligible for selection: anything not marked unhealthy.
    pub fn is_selectable(&self) -> bool {
        self.status() != HealthStatus::Unhealthy
    }

    /// Get the current number of active connections.
    pub fn connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Increment active connection count.
    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active connection count.
    pub fn dec_connections(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Create a guard that holds one active connection until dropped.
    pub fn connection_guard(self: &Arc<Self>) -> ConnectionGuard {
        self.inc_connections();
        ConnectionGuard {
            instance: self.clone(),
        }
    }

    /// Record the outcome of a completed call.
    pub fn record_call(&self, success: bool, elapsed: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        let sample = elapsed.as_micros() as f64;
        let _ = self
            .avg_response_micros
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let current = f64::from_bits(bits);
                let next = if current == 0.0 {
                    sample
                } else {
                    current + EWMA_ALPHA * (sample - current)
                };
                Some(next.to_bits())
            });
    }

    /// Rolling average response time.
    pub fn avg_response_time(&self) -> Duration {
        let micros = f64::from_bits(self.avg_response_micros.load(Ordering::Relaxed));
        Duration::from_micros(micros as u64)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    /// Serializable point-in-time view.
    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            service: self.service.clone(),
            instance_id: self.instance_id(),
            weight: self.weight(),
            status: self.status(),
            active_connections: self.connections(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            avg_response_ms: self.avg_response_time().as_secs_f64() * 1000.0,
            total_requests: self.total_requests(),
            failed_requests: self.failed_requests(),
        }
    }
}

/// Serializable view of an instance for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub service: String,
    pub instance_id: String,
    pub weight: u32,
    pub status: HealthStatus,
    pub active_connections: usize,
    pub consecutive_failures: u32,
    pub avg_response_ms: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
}

/// A RAII guard that manages the active connection count.
#[derive(Debug)]
pub struct ConnectionGuard {
    pub instance: Arc<ServiceInstance>,
}

impl Deref for ConnectionGuard {
    type Target = ServiceInstance;
    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.instance.dec_connections();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_guard() {
        let inst = Arc::new(ServiceInstance::new("svc", "127.0.0.1", 8080, 1));
        {
            let _g1 = inst.connection_guard();
            let _g2 = inst.connection_guard();
            assert_eq!(inst.connections(), 2);
        }
        assert_eq!(inst.connections(), 0);

        // Never underflows
        inst.dec_connections();
        assert_eq!(inst.connections(), 0);
    }

    #[test]
    fn test_status_swap() {
        let inst = ServiceInstance::new("svc", "10.0.0.1", 80, 0);
        assert_eq!(inst.weight(), 1);
        assert_eq!(inst.status(), HealthStatus::Unknown);
        assert!(inst.is_selectable());

        let prev = inst.set_status(HealthStatus::Unhealthy);
        assert_eq!(prev, HealthStatus::Unknown);
        assert!(!inst.is_selectable());
    }

    #[test]
    fn test_record_call() {
        let inst = ServiceInstance::new("svc", "10.0.0.1", 80, 1);
        inst.record_call(true, Duration::from_millis(10));
        inst.record_call(false, Duration::from_millis(20));

        assert_eq!(inst.total_requests(), 2);
        assert_eq!(inst.failed_requests(), 1);
        // 10ms then 10 + 0.2 * (20 - 10) = 12ms
        assert_eq!(inst.avg_response_time(), Duration::from_millis(12));
    }
}
