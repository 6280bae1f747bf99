//! Round-robin load balancing strategy.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::Strategy;
use crate::registry::ServiceInstance;

/// Round-robin selector.
/// Keeps one cursor per service and advances it modulo the healthy set size.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursors: DashMap<String, AtomicUsize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for RoundRobin {
    fn pick(
        &self,
        service: &str,
        healthy: &[Arc<ServiceInstance>],
        _key: Option<&str>,
    ) -> Option<Arc<ServiceInstance>> {
        if healthy.is_empty() {
            return None;
        }

        // The set is already filtered, so unhealthy members never consume a slot.
        let ticket = match self.cursors.get(service) {
            Some(cursor) => cursor.fetch_add(1, Ordering::Relaxed),
            None => self
                .cursors
                .entry(service.to_string())
                .or_default()
                .fetch_add(1, Ordering::Relaxed),
        };

        healthy.get(ticket % healthy.len()).cloned()
    }
}
