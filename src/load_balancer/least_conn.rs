//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::Strategy;
use crate::registry::ServiceInstance;

/// Least connections selector.
/// Selects the instance with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for LeastConnections {
    fn pick(
        &self,
        _service: &str,
        healthy: &[Arc<ServiceInstance>],
        _key: Option<&str>,
    ) -> Option<Arc<ServiceInstance>> {
        // Ties go to the earliest registration.
        healthy
            .iter()
            .min_by_key(|i| (i.connections(), i.seq))
            .cloned()
    }
}
