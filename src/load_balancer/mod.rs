//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! ServiceClient / GatewayRouter asks for a service
//!     → registry lists its instances (registration order)
//!     → healthy set = instances not marked Unhealthy
//!     → algorithm for the service (override or global default):
//!         - round_robin.rs (per-service cursor)
//!         - least_conn.rs (fewest active connections)
//!         - weighted.rs (smooth weighted round robin)
//!         - ip_hash.rs (stable hash of the caller key)
//!         - random.rs (uniform)
//!     → Arc<ServiceInstance> or NoHealthyInstance
//! ```
//!
//! # Design Decisions
//! - Strategies only see the already filtered healthy set
//! - Unknown instances are eligible until probes resolve them
//! - Never falls back to an unhealthy instance
//! - Strategy state (cursors, counters) is keyed by service name

pub mod ip_hash;
pub mod least_conn;
pub mod random;
pub mod round_robin;
pub mod weighted;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ServiceConfig;
use crate::registry::{ServiceInstance, ServiceRegistry};

pub use ip_hash::IpHash;
pub use least_conn::LeastConnections;
pub use random::Random;
pub use round_robin::RoundRobin;
pub use weighted::WeightedRoundRobin;

/// Selection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    RoundRobin,
    LeastConnections,
    WeightedRoundRobin,
    IpHash,
    Random,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::RoundRobin => "round_robin",
            Algorithm::LeastConnections => "least_connections",
            Algorithm::WeightedRoundRobin => "weighted_round_robin",
            Algorithm::IpHash => "ip_hash",
            Algorithm::Random => "random",
        };
        f.write_str(name)
    }
}

/// A selection strategy over a non-empty healthy set.
pub trait Strategy: Send + Sync + fmt::Debug {
    /// Pick one instance. `key` is the caller affinity key, if any.
    fn pick(
        &self,
        service: &str,
        healthy: &[Arc<ServiceInstance>],
        key: Option<&str>,
    ) -> Option<Arc<ServiceInstance>>;
}

/// Returned when a service has no selectable instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no healthy instance for service {0}")]
pub struct NoHealthyInstance(pub String);

#[derive(Debug, Default)]
struct Strategies {
    round_robin: RoundRobin,
    least_connections: LeastConnections,
    weighted: WeightedRoundRobin,
    ip_hash: IpHash,
    random: Random,
}

impl Strategies {
    fn get(&self, algorithm: Algorithm) -> &dyn Strategy {
        match algorithm {
            Algorithm::RoundRobin => &self.round_robin,
            Algorithm::LeastConnections => &self.least_connections,
            Algorithm::WeightedRoundRobin => &self.weighted,
            Algorithm::IpHash => &self.ip_hash,
            Algorithm::Random => &self.random,
        }
    }
}

/// Picks one healthy instance of a service per call.
#[derive(Debug)]
pub struct LoadBalancer {
    registry: Arc<ServiceRegistry>,
    default_algorithm: Algorithm,
    overrides: DashMap<String, Algorithm>,
    strategies: Strategies,
}

impl LoadBalancer {
    pub fn new(registry: Arc<ServiceRegistry>, default_algorithm: Algorithm) -> Self {
        Self {
            registry,
            default_algorithm,
            overrides: DashMap::new(),
            strategies: Strategies::default(),
        }
    }

    /// Build a balancer honoring per-service algorithm overrides from config.
    pub fn from_config(
        registry: Arc<ServiceRegistry>,
        default_algorithm: Algorithm,
        services: &[ServiceConfig],
    ) -> Self {
        let lb = Self::new(registry, default_algorithm);
        for service in services {
            if let Some(algorithm) = service.algorithm {
                lb.set_algorithm(&service.name, algorithm);
            }
        }
        lb
    }

    /// Override the algorithm for one service.
    pub fn set_algorithm(&self, service: &str, algorithm: Algorithm) {
        self.overrides.insert(service.to_string(), algorithm);
    }

    /// Algorithm in effect for a service.
    pub fn algorithm_for(&self, service: &str) -> Algorithm {
        self.overrides
            .get(service)
            .map(|a| *a)
            .unwrap_or(self.default_algorithm)
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn select(&self, service: &str) -> Result<Arc<ServiceInstance>, NoHealthyInstance> {
        self.select_with_key(service, None)
    }

    /// Select with an affinity key (used by the IP hash algorithm).
    pub fn select_with_key(
        &self,
        service: &str,
        key: Option<&str>,
    ) -> Result<Arc<ServiceInstance>, NoHealthyInstance> {
        let healthy: Vec<Arc<ServiceInstance>> = self
            .registry
            .list(service)
            .into_iter()
            .filter(|i| i.is_selectable())
            .collect();

        if healthy.is_empty() {
            tracing::debug!(service = %service, "No healthy instances");
            return Err(NoHealthyInstance(service.to_string()));
        }

        let algorithm = self.algorithm_for(service);
        self.strategies
            .get(algorithm)
            .pick(service, &healthy, key)
            .ok_or_else(|| NoHealthyInstance(service.to_string()))
    }
}
