//! Service registry: instance registration, health bookkeeping, and
//! stale-instance cleanup.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub service_name: String,
    pub host: String,
    pub port: u16,
    /// Relative weight for weighted selection.
    pub weight: u32,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub registered_at: DateTime<Utc>,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl ServiceInstance {
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Probe failures before an instance leaves the selectable set.
    pub failure_threshold: u32,
    /// Unhealthy instances unchecked for this long are unregistered.
    pub stale_threshold: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            stale_threshold: Duration::from_secs(300),
        }
    }
}

/// Instances keyed by id, grouped by service name through the
/// `service_name` back-reference (no bidirectional pointers).
pub struct ServiceRegistry {
    config: RegistryConfig,
    instances: RwLock<HashMap<String, ServiceInstance>>,
}

impl ServiceRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn register(
        &self,
        service_name: &str,
        host: &str,
        port: u16,
        weight: u32,
    ) -> ServiceInstance {
        let instance = ServiceInstance {
            id: Uuid::new_v4().to_string(),
            service_name: service_name.to_string(),
            host: host.to_string(),
            port,
            weight: weight.max(1),
            healthy: true,
            consecutive_failures: 0,
            registered_at: Utc::now(),
            last_health_check: None,
        };
        self.instances
            .write()
            .insert(instance.id.clone(), instance.clone());
        tracing::info!(service = service_name, endpoint = %instance.endpoint(), "registered instance");
        instance
    }

    pub fn deregister(&self, instance_id: &str) -> bool {
        let removed = self.instances.write().remove(instance_id).is_some();
        if removed {
            tracing::info!(instance_id, "deregistered instance");
        }
        removed
    }

    pub fn get(&self, instance_id: &str) -> Option<ServiceInstance> {
        self.instances.read().get(instance_id).cloned()
    }

    /// Instances of a service, optionally only the selectable (healthy)
    /// ones, ordered by id for deterministic iteration.
    pub fn instances_of(&self, service_name: &str, healthy_only: bool) -> Vec<ServiceInstance> {
        let mut list: Vec<ServiceInstance> = self
            .instances
            .read()
            .values()
            .filter(|i| i.service_name == service_name)
            .filter(|i| !healthy_only || i.healthy)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn all_instances(&self) -> Vec<ServiceInstance> {
        self.instances.read().values().cloned().collect()
    }

    pub fn healthy_count(&self) -> usize {
        self.instances.read().values().filter(|i| i.healthy).count()
    }

    /// Record a probe success: the instance returns to the selectable set.
    pub fn record_probe_success(&self, instance_id: &str) {
        if let Some(instance) = self.instances.write().get_mut(instance_id) {
            instance.healthy = true;
            instance.consecutive_failures = 0;
            instance.last_health_check = Some(Utc::now());
        }
    }

    /// Record a probe failure; at the failure threshold the instance
    /// leaves the selectable set.
    pub fn record_probe_failure(&self, instance_id: &str) {
        if let Some(instance) = self.instances.write().get_mut(instance_id) {
            instance.consecutive_failures += 1;
            instance.last_health_check = Some(Utc::now());
            if instance.consecutive_failures >= self.config.failure_threshold {
                if instance.healthy {
                    tracing::warn!(
                        instance_id,
                        failures = instance.consecutive_failures,
                        "instance marked unhealthy"
                    );
                }
                instance.healthy = false;
            }
        }
    }

    /// Immediately mark an instance unhealthy (failover path).
    pub fn mark_unhealthy(&self, instance_id: &str) {
        if let Some(instance) = self.instances.write().get_mut(instance_id) {
            instance.healthy = false;
            instance.consecutive_failures += 1;
            instance.last_health_check = Some(Utc::now());
        }
    }

    /// Unregister unhealthy instances whose last check is older than the
    /// stale threshold. Returns the removed count.
    pub fn cleanup_stale(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.stale_threshold)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let mut instances = self.instances.write();
        let before = instances.len();
        instances.retain(|_, i| {
            i.healthy
                || i.last_health_check.map_or(true, |checked| checked > cutoff)
        });
        let removed = before - instances.len();
        if removed > 0 {
            tracing::info!(removed, "unregistered stale instances");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(RegistryConfig::default())
    }

    #[test]
    fn test_register_and_group_by_service() {
        let reg = registry();
        reg.register("api", "10.0.0.1", 8000, 1);
        reg.register("api", "10.0.0.2", 8000, 1);
        reg.register("worker", "10.0.0.3", 9000, 1);
        assert_eq!(reg.instances_of("api", false).len(), 2);
        assert_eq!(reg.instances_of("worker", false).len(), 1);
        assert_eq!(reg.instances_of("missing", false).len(), 0);
    }

    #[test]
    fn test_failure_threshold_removes_from_selectable_set() {
        let reg = registry();
        let instance = reg.register("api", "10.0.0.1", 8000, 1);

        reg.record_probe_failure(&instance.id);
        reg.record_probe_failure(&instance.id);
        assert!(reg.get(&instance.id).unwrap().healthy, "under threshold");

        reg.record_probe_failure(&instance.id);
        let after = reg.get(&instance.id).unwrap();
        assert!(!after.healthy);
        assert_eq!(after.consecutive_failures, 3);
        assert!(reg.instances_of("api", true).is_empty());
    }

    #[test]
    fn test_probe_success_resets_to_healthy() {
        let reg = registry();
        let instance = reg.register("api", "10.0.0.1", 8000, 1);
        for _ in 0..4 {
            reg.record_probe_failure(&instance.id);
        }
        assert!(!reg.get(&instance.id).unwrap().healthy);

        reg.record_probe_success(&instance.id);
        let after = reg.get(&instance.id).unwrap();
        assert!(after.healthy);
        assert_eq!(after.consecutive_failures, 0);
    }

    #[test]
    fn test_cleanup_keeps_fresh_and_healthy() {
        let reg = ServiceRegistry::new(RegistryConfig {
            failure_threshold: 1,
            stale_threshold: Duration::from_secs(0),
        });
        let healthy = reg.register("api", "10.0.0.1", 8000, 1);
        let stale = reg.register("api", "10.0.0.2", 8000, 1);
        reg.record_probe_failure(&stale.id);

        let removed = reg.cleanup_stale();
        assert_eq!(removed, 1);
        assert!(reg.get(&healthy.id).is_some());
        assert!(reg.get(&stale.id).is_none());
    }
}
