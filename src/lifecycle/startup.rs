//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem from one validated `MeshConfig`
//! - Start background tasks (health checks, event retention, bridges)
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in dependency order, not concurrently
//! - One `MeshContext` per process; tests build their own isolated ones

use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::client::{HttpTransport, ServiceClient, Transport};
use crate::config::{ConfigError, MeshConfig};
use crate::events::{BusSettings, EventBus, EventError, EventLog, EventPublisher, FileEventLog, MemoryEventLog};
use crate::gateway::GatewayRouter;
use crate::health::{HealthChecker, HealthEvent};
use crate::lifecycle::shutdown::Shutdown;
use crate::load_balancer::LoadBalancer;
use crate::registry::ServiceRegistry;
use crate::resilience::{BreakerSettings, CircuitBreakers};

/// Event type published when the health checker changes an instance's status.
pub const HEALTH_CHANGED_EVENT: &str = "instance.health_changed";

/// Event type published when the health checker evicts an instance.
pub const INSTANCE_EVICTED_EVENT: &str = "instance.evicted";

/// Rate limiter buckets idle this long are dropped.
const RATE_LIMIT_IDLE: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("event log: {0}")]
    Events(#[from] EventError),
}

/// Every subsystem of a running mesh node.
#[derive(Debug)]
pub struct MeshContext {
    pub config: MeshConfig,
    pub registry: Arc<ServiceRegistry>,
    pub balancer: Arc<LoadBalancer>,
    pub breakers: Arc<CircuitBreakers>,
    pub client: ServiceClient,
    pub health: Arc<HealthChecker>,
    pub bus: Arc<EventBus>,
    pub publisher: EventPublisher,
    pub gateway: Arc<GatewayRouter>,
    started_at: Instant,
}

impl MeshContext {
    /// Build a context that talks HTTP to upstream instances.
    pub async fn build(config: MeshConfig) -> Result<Self, StartupError> {
        Self::build_with_transport(config, Arc::new(HttpTransport::new())).await
    }

    pub async fn build_with_transport(
        config: MeshConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, StartupError> {
        let registry = Arc::new(ServiceRegistry::from_config(&config.services));
        let balancer = Arc::new(LoadBalancer::from_config(
            registry.clone(),
            config.load_balancer.algorithm,
            &config.services,
        ));
        let breakers = Arc::new(CircuitBreakers::new(BreakerSettings::from(&config.circuit_breaker)));
        let client = ServiceClient::from_config(&config, balancer.clone(), breakers.clone(), transport);
        let health = Arc::new(HealthChecker::from_config(registry.clone(), &config.health_check));

        let log: Arc<dyn EventLog> = match &config.events.log_path {
            Some(path) => Arc::new(FileEventLog::open(path).await?),
            None => Arc::new(MemoryEventLog::new()),
        };
        let bus = Arc::new(EventBus::new(log, BusSettings::from(&config.events)));
        let publisher = EventPublisher::new(bus.clone(), config.events.source.clone());

        let gateway = Arc::new(GatewayRouter::from_config(
            &config,
            client.clone(),
            Some(publisher.clone()),
        ));

        tracing::info!(
            services = registry.services().len(),
            instances = registry.all_instances().len(),
            routes = config.routes.len(),
            algorithm = %config.load_balancer.algorithm,
            "Mesh context initialized"
        );

        Ok(Self {
            config,
            registry,
            balancer,
            breakers,
            client,
            health,
            bus,
            publisher,
            gateway,
            started_at: Instant::now(),
        })
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Start every background task and register it with `shutdown`.
    pub fn spawn_background(&self, shutdown: &mut Shutdown) {
        if self.config.health_check.enabled {
            let handle = self.health.clone().spawn(shutdown.subscribe());
            shutdown.track("health-checker", handle);
        }

        let handle = self.bus.clone().spawn_maintenance(
            Duration::from_secs(self.config.events.compaction_interval_secs.max(1)),
            shutdown.subscribe(),
        );
        shutdown.track("event-maintenance", handle);

        shutdown.track("health-bridge", self.spawn_health_bridge(shutdown.subscribe()));

        if self.gateway.rate_limiter().is_some() {
            shutdown.track("rate-limit-pruner", self.spawn_rate_limit_pruner(shutdown.subscribe()));
        }
    }

    /// Republish health transitions as events.
    fn spawn_health_bridge(&self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let mut events = self.health.subscribe();
        let publisher = self.publisher.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    received = events.recv() => match received {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Health bridge lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.recv() => break,
                };

                let event_type = match &event {
                    HealthEvent::StatusChanged { .. } => HEALTH_CHANGED_EVENT,
                    HealthEvent::Evicted { .. } => INSTANCE_EVICTED_EVENT,
                };
                if let Err(e) = publisher.publish(event_type, &event, None).await {
                    tracing::warn!(error = %e, event_type, "Failed to publish health event");
                }
            }
        })
    }

    fn spawn_rate_limit_pruner(&self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RATE_LIMIT_IDLE);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Some(limiter) = gateway.rate_limiter() {
                            let pruned = limiter.prune(RATE_LIMIT_IDLE);
                            tracing::debug!(pruned, "Pruned idle rate limit buckets");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    /// Apply a reloaded configuration. Only routes change at runtime.
    pub fn apply_reload(&self, config: &MeshConfig) {
        self.gateway.reload_routes(config.routes.clone());
    }

    /// Stop event delivery workers after their queues drain.
    pub async fn close(&self) {
        self.bus.shutdown().await;
    }
}
