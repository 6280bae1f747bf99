//! Uniform random selection.

use std::sync::Arc;

use crate::load_balancer::Strategy;
use crate::registry::ServiceInstance;

#[derive(Debug, Default)]
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for Random {
    fn pick(
        &self,
        _service: &str,
        healthy: &[Arc<ServiceInstance>],
        _key: Option<&str>,
    ) -> Option<Arc<ServiceInstance>> {
        if healthy.is_empty() {
            return None;
        }
        healthy.get(fastrand::usize(..healthy.len())).cloned()
    }
}
