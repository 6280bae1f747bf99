//! In-memory service directory.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::registry::instance::{HealthStatus, InstanceSnapshot, ServiceInstance};

/// Holds the known instances of every logical service.
///
/// Membership is sharded by service name, so registering an instance of one
/// service never contends with selection on another. Health status and
/// counters live in atomics on the instance itself.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: DashMap<String, Vec<Arc<ServiceInstance>>>,
    next_seq: AtomicU64,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry pre-populated from configuration.
    pub fn from_config(services: &[ServiceConfig]) -> Self {
        let registry = Self::new();
        for service in services {
            for inst in &service.instances {
                registry.register(ServiceInstance::new(
                    service.name.clone(),
                    inst.host.clone(),
                    inst.port,
                    inst.weight,
                ));
            }
        }
        registry
    }

    /// Register an instance. Idempotent on (service, host, port): an existing
    /// registration is kept (with its counters) and only its weight updated.
    pub fn register(&self, instance: ServiceInstance) -> Arc<ServiceInstance> {
        let mut members = self.services.entry(instance.service.clone()).or_default();

        if let Some(existing) = members
            .iter()
            .find(|i| i.host == instance.host && i.port == instance.port)
        {
            existing
                .weight
                .store(instance.weight(), Ordering::Relaxed);
            tracing::debug!(
                service = %existing.service,
                instance = %existing.instance_id(),
                "Instance already registered"
            );
            return existing.clone();
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let instance = Arc::new(instance.with_seq(seq));
        members.push(instance.clone());

        tracing::info!(
            service = %instance.service,
            instance = %instance.instance_id(),
            weight = instance.weight(),
            "Registered service instance"
        );
        instance
    }

    /// Convenience form of [`register`](Self::register).
    pub fn register_endpoint(
        &self,
        service: &str,
        host: &str,
        port: u16,
        weight: u32,
    ) -> Arc<ServiceInstance> {
        self.register(ServiceInstance::new(service, host, port, weight))
    }

    /// Remove an instance. Unknown services or instances are a no-op.
    pub fn deregister(&self, service: &str, instance_id: &str) -> Option<Arc<ServiceInstance>> {
        let mut members = self.services.get_mut(service)?;
        let pos = members.iter().position(|i| i.instance_id() == instance_id)?;
        let removed = members.remove(pos);
        let now_empty = members.is_empty();
        drop(members);

        if now_empty {
            self.services.remove_if(service, |_, v| v.is_empty());
        }

        tracing::info!(service = %service, instance = %instance_id, "Deregistered service instance");
        Some(removed)
    }

    /// Snapshot of a service's members in registration order.
    pub fn list(&self, service: &str) -> Vec<Arc<ServiceInstance>> {
        self.services
            .get(service)
            .map(|members| members.clone())
            .unwrap_or_default()
    }

    /// Look up a single instance.
    pub fn get(&self, service: &str, instance_id: &str) -> Option<Arc<ServiceInstance>> {
        self.services
            .get(service)?
            .iter()
            .find(|i| i.instance_id() == instance_id)
            .cloned()
    }

    /// Set the health status of an instance, returning the previous status.
    pub fn update_health(
        &self,
        service: &str,
        instance_id: &str,
        status: HealthStatus,
    ) -> Option<HealthStatus> {
        let instance = self.get(service, instance_id)?;
        Some(instance.set_status(status))
    }

    /// Names of all services with at least one instance, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Every registered instance across all services.
    pub fn all_instances(&self) -> Vec<Arc<ServiceInstance>> {
        let mut all: Vec<Arc<ServiceInstance>> = self
            .services
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        all.sort_by_key(|i| i.seq);
        all
    }

    /// Serializable view of every instance.
    pub fn snapshot(&self) -> Vec<InstanceSnapshot> {
        self.all_instances().iter().map(|i| i.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let registry = ServiceRegistry::new();
        let a = registry.register_endpoint("inventory", "10.0.0.1", 8000, 1);
        a.inc_connections();

        let again = registry.register_endpoint("inventory", "10.0.0.1", 8000, 4);
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(again.weight(), 4);
        assert_eq!(again.connections(), 1);
        assert_eq!(registry.list("inventory").len(), 1);
    }

    #[test]
    fn test_list_preserves_registration_order() {
        let registry = ServiceRegistry::new();
        registry.register_endpoint("orders", "b", 1, 1);
        registry.register_endpoint("orders", "a", 1, 1);
        registry.register_endpoint("orders", "c", 1, 1);

        let ids: Vec<String> = registry.list("orders").iter().map(|i| i.instance_id()).collect();
        assert_eq!(ids, vec!["b:1", "a:1", "c:1"]);
    }

    #[test]
    fn test_list_is_a_snapshot() {
        let registry = ServiceRegistry::new();
        registry.register_endpoint("orders", "a", 1, 1);
        let snapshot = registry.list("orders");

        registry.register_endpoint("orders", "b", 1, 1);
        registry.deregister("orders", "a:1");

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].instance_id(), "a:1");
        assert_eq!(registry.list("orders")[0].instance_id(), "b:1");
    }

    #[test]
    fn test_deregister_unknown_is_noop() {
        let registry = ServiceRegistry::new();
        assert!(registry.deregister("missing", "x:1").is_none());

        registry.register_endpoint("orders", "a", 1, 1);
        assert!(registry.deregister("orders", "x:1").is_none());
        assert_eq!(registry.list("orders").len(), 1);

        assert!(registry.deregister("orders", "a:1").is_some());
        assert!(registry.services().is_empty());
    }

    #[test]
    fn test_update_health() {
        let registry = ServiceRegistry::new();
        registry.register_endpoint("orders", "a", 1, 1);

        let prev = registry.update_health("orders", "a:1", HealthStatus::Healthy);
        assert_eq!(prev, Some(HealthStatus::Unknown));
        assert_eq!(registry.list("orders")[0].status(), HealthStatus::Healthy);

        assert!(registry.update_health("orders", "zz:9", HealthStatus::Healthy).is_none());
    }
}
