//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every registered instance
//! - Apply threshold transitions to instance status
//! - Announce transitions on a broadcast channel and to observers
//! - Optionally evict instances that stay down

use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::health::history::{HealthHistory, HealthRecord, HealthStats};
use crate::health::probe::{probe_from_config, Probe};
use crate::health::state::{next_status, Thresholds};
use crate::observability::metrics;
use crate::registry::{HealthStatus, ServiceInstance, ServiceRegistry};

/// Something the checker decided about an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthEvent {
    StatusChanged {
        service: String,
        instance_id: String,
        from: HealthStatus,
        to: HealthStatus,
    },
    Evicted {
        service: String,
        instance_id: String,
    },
}

pub type HealthObserver = Arc<dyn Fn(&HealthEvent) + Send + Sync>;

/// Counts across every registered instance.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct OverallHealth {
    pub services: usize,
    pub instances: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
}

pub struct HealthChecker {
    registry: Arc<ServiceRegistry>,
    probe: Arc<dyn Probe>,
    thresholds: Thresholds,
    interval: Duration,
    evict_after: Option<u32>,
    history: HealthHistory,
    events: broadcast::Sender<HealthEvent>,
    observers: RwLock<Vec<HealthObserver>>,
}

impl fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthChecker")
            .field("probe", &self.probe)
            .field("thresholds", &self.thresholds)
            .field("interval", &self.interval)
            .field("evict_after", &self.evict_after)
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl HealthChecker {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        probe: Arc<dyn Probe>,
        config: &HealthCheckConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            registry,
            probe,
            thresholds: Thresholds::from(config),
            interval: config.interval(),
            evict_after: config.evict_after,
            history: HealthHistory::new(config.history_size),
            events,
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Checker using the probe kind named in the configuration.
    pub fn from_config(registry: Arc<ServiceRegistry>, config: &HealthCheckConfig) -> Self {
        Self::new(registry, probe_from_config(config), config)
    }

    /// Receive every transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    /// Register a callback invoked synchronously on every transition.
    pub fn add_observer<F>(&self, observer: F)
    where
        F: Fn(&HealthEvent) + Send + Sync + 'static,
    {
        self.observers.write().push(Arc::new(observer));
    }

    /// Start the background loop. It stops when `shutdown` fires.
    pub fn spawn(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval = ?self.interval, probe = ?self.probe, "Health checker starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health checker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every registered instance concurrently. Returns how many were probed.
    pub async fn check_all(&self) -> usize {
        let instances = self.registry.all_instances();
        let count = instances.len();
        join_all(instances.iter().map(|instance| self.check_instance(instance))).await;
        count
    }

    /// Probe one instance and apply the outcome.
    pub async fn check_instance(&self, instance: &Arc<ServiceInstance>) -> HealthRecord {
        let outcome = self.probe.check(instance).await;
        let instance_id = instance.instance_id();

        let (failures, successes) = if outcome.healthy {
            instance.consecutive_failures.store(0, Ordering::Relaxed);
            let s = instance.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
            (0, s)
        } else {
            instance.consecutive_successes.store(0, Ordering::Relaxed);
            let f = instance.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(
                service = %instance.service,
                instance = %instance_id,
                failures = f,
                detail = outcome.detail.as_deref().unwrap_or(""),
                "Health probe failed"
            );
            (f, 0)
        };

        let record = HealthRecord {
            timestamp: Utc::now(),
            healthy: outcome.healthy,
            latency_ms: outcome.latency.as_secs_f64() * 1000.0,
            detail: outcome.detail,
        };
        self.history.push(&history_key(&instance.service, &instance_id), record.clone());

        if let Some(to) = next_status(instance.status(), failures, successes, self.thresholds) {
            let from = instance.set_status(to);
            if from != to {
                self.on_transition(instance, &instance_id, from, to);
            }
        }
        metrics::record_instance_health(&instance_id, instance.is_selectable());

        if let Some(limit) = self.evict_after {
            if failures >= limit {
                self.evict(instance, &instance_id);
            }
        }

        record
    }

    /// Most recent probe records for an instance, newest last.
    pub fn history(&self, service: &str, instance_id: &str, limit: usize) -> Vec<HealthRecord> {
        self.history.recent(&history_key(service, instance_id), limit)
    }

    pub fn stats(&self, service: &str, instance_id: &str) -> Option<HealthStats> {
        self.history.stats(&history_key(service, instance_id))
    }

    pub fn overall_stats(&self) -> OverallHealth {
        let instances = self.registry.all_instances();
        let mut overall = OverallHealth {
            services: self.registry.services().len(),
            instances: instances.len(),
            ..OverallHealth::default()
        };
        for instance in &instances {
            match instance.status() {
                HealthStatus::Healthy => overall.healthy += 1,
                HealthStatus::Unhealthy => overall.unhealthy += 1,
                HealthStatus::Unknown => overall.unknown += 1,
            }
        }
        overall
    }

    fn on_transition(
        &self,
        instance: &ServiceInstance,
        instance_id: &str,
        from: HealthStatus,
        to: HealthStatus,
    ) {
        if to == HealthStatus::Unhealthy {
            tracing::warn!(service = %instance.service, instance = %instance_id, %from, "Instance marked unhealthy");
        } else {
            tracing::info!(service = %instance.service, instance = %instance_id, %from, %to, "Instance health changed");
        }
        self.emit(HealthEvent::StatusChanged {
            service: instance.service.clone(),
            instance_id: instance_id.to_string(),
            from,
            to,
        });
    }

    fn evict(&self, instance: &ServiceInstance, instance_id: &str) {
        if self.registry.deregister(&instance.service, instance_id).is_none() {
            return;
        }
        tracing::warn!(service = %instance.service, instance = %instance_id, "Instance evicted after repeated probe failures");
        self.history.remove(&history_key(&instance.service, instance_id));
        self.emit(HealthEvent::Evicted {
            service: instance.service.clone(),
            instance_id: instance_id.to_string(),
        });
    }

    fn emit(&self, event: HealthEvent) {
        for observer in self.observers.read().iter() {
            observer(&event);
        }
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

fn history_key(service: &str, instance_id: &str) -> String {
    format!("{service}/{instance_id}")
}
