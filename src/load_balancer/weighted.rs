//! Smooth weighted round-robin strategy.
//!
//! Every pick adds each instance's weight to its running counter, selects the
//! largest counter and subtracts the total weight from the winner. Over any
//! window of `sum(weights)` picks each instance is chosen exactly `weight`
//! times, and heavy instances are interleaved rather than bunched.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::load_balancer::Strategy;
use crate::registry::ServiceInstance;

#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    /// service -> (instance_id -> running counter)
    counters: DashMap<String, HashMap<String, i64>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for WeightedRoundRobin {
    fn pick(
        &self,
        service: &str,
        healthy: &[Arc<ServiceInstance>],
        _key: Option<&str>,
    ) -> Option<Arc<ServiceInstance>> {
        if healthy.is_empty() {
            return None;
        }

        // The entry guard holds the shard lock for the whole pick.
        let mut counters = self.counters.entry(service.to_string()).or_default();

        let ids: Vec<String> = healthy.iter().map(|i| i.instance_id()).collect();

        // Drop counters for instances that left the healthy set.
        if counters.len() != ids.len() || ids.iter().any(|id| !counters.contains_key(id)) {
            let live: HashSet<&String> = ids.iter().collect();
            counters.retain(|id, _| live.contains(id));
        }

        let total: i64 = healthy.iter().map(|i| i.weight() as i64).sum();
        let mut best: Option<(usize, i64)> = None;

        for (idx, (instance, id)) in healthy.iter().zip(&ids).enumerate() {
            let current = counters.entry(id.clone()).or_insert(0);
            *current += instance.weight() as i64;
            if best.map_or(true, |(_, value)| *current > value) {
                best = Some((idx, *current));
            }
        }

        let (idx, _) = best?;
        if let Some(current) = counters.get_mut(&ids[idx]) {
            *current -= total;
        }
        healthy.get(idx).cloned()
    }
}
