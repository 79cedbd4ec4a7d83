//! Load balancing with automatic failover.
//!
//! The balancer composes the service registry, a selection strategy, and
//! (optionally) the health prober's trigger channel: a failed call marks
//! its instance unhealthy, schedules an immediate probe, and retries a
//! distinct instance until `max_retries` is exhausted.

pub mod health;
pub mod registry;
pub mod strategies;

pub use health::{HealthProber, ProbeConfig, ProbeKind, ProberHandle};
pub use registry::{RegistryConfig, ServiceInstance, ServiceRegistry};
pub use strategies::{SelectionStrategy, StrategyState};

use crate::error::OpsError;
use crate::metrics::OpsMetrics;
use futures::future::join_all;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct LoadBalancer {
    registry: Arc<ServiceRegistry>,
    strategy: SelectionStrategy,
    state: StrategyState,
    metrics: Arc<OpsMetrics>,
    max_retries: u32,
    probe_trigger: parking_lot::Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl LoadBalancer {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        strategy: SelectionStrategy,
        metrics: Arc<OpsMetrics>,
        max_retries: u32,
    ) -> Self {
        Self {
            registry,
            strategy,
            state: StrategyState::new(),
            metrics,
            max_retries,
            probe_trigger: parking_lot::Mutex::new(None),
        }
    }

    /// Wire the prober's trigger channel so failovers request immediate
    /// probes of the instances they condemn.
    pub fn set_probe_trigger(&self, trigger: mpsc::UnboundedSender<String>) {
        *self.probe_trigger.lock() = Some(trigger);
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Select an instance for a request, without executing anything.
    pub fn get_instance(&self, service: &str, healthy_only: bool) -> Option<ServiceInstance> {
        let candidates = self.registry.instances_of(service, healthy_only);
        self.strategy.select(service, &candidates, &self.state)
    }

    /// Apply `call` to a selected instance with automatic failover.
    ///
    /// Each retry selects a distinct not-yet-tried instance; a failed
    /// attempt marks its instance unhealthy and triggers an immediate
    /// probe. When no untried instance remains the whole call fails.
    pub async fn execute<T, F, Fut>(&self, service: &str, call: F) -> Result<T, OpsError>
    where
        F: Fn(ServiceInstance) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.metrics.lb_requests_total.inc();
        let mut tried: HashSet<String> = HashSet::new();
        let mut attempts = 0u32;

        while attempts < self.max_retries {
            let candidates: Vec<ServiceInstance> = self
                .registry
                .instances_of(service, true)
                .into_iter()
                .filter(|i| !tried.contains(&i.id))
                .collect();
            let Some(instance) = self.strategy.select(service, &candidates, &self.state) else {
                break;
            };

            attempts += 1;
            tried.insert(instance.id.clone());
            self.state.connection_started(&instance.id);
            let result = call(instance.clone()).await;
            self.state.connection_finished(&instance.id);

            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!(
                        service,
                        instance_id = %instance.id,
                        error = %err,
                        "instance call failed, failing over"
                    );
                    self.metrics.lb_requests_failed.inc();
                    self.registry.mark_unhealthy(&instance.id);
                    if let Some(trigger) = self.probe_trigger.lock().as_ref() {
                        let _ = trigger.send(instance.id.clone());
                    }
                    if attempts < self.max_retries {
                        self.metrics.lb_failover.inc();
                    }
                }
            }
        }

        if self.registry.instances_of(service, false).is_empty() {
            Err(OpsError::NoInstances(service.to_string()))
        } else {
            Err(OpsError::AllInstancesFailed {
                service: service.to_string(),
                attempts,
            })
        }
    }

    /// Fan a call out to every healthy instance in parallel and collect
    /// per-instance results.
    pub async fn fan_out<T, F, Fut>(
        &self,
        service: &str,
        call: F,
    ) -> Vec<(ServiceInstance, anyhow::Result<T>)>
    where
        F: Fn(ServiceInstance) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let instances = self.registry.instances_of(service, true);
        let results = join_all(instances.iter().cloned().map(&call)).await;
        instances.into_iter().zip(results).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn balancer(max_retries: u32) -> (LoadBalancer, Arc<ServiceRegistry>) {
        let registry = Arc::new(ServiceRegistry::new(RegistryConfig::default()));
        let lb = LoadBalancer::new(
            registry.clone(),
            SelectionStrategy::default(),
            Arc::new(OpsMetrics::new().unwrap()),
            max_retries,
        );
        (lb, registry)
    }

    #[tokio::test]
    async fn test_failover_to_next_instance() {
        let (lb, registry) = balancer(3);
        for i in 1..=3 {
            registry.register("api", &format!("10.0.0.{}", i), 8000, 1);
        }

        // Whichever instance is selected first fails; the retry must land
        // on a different one.
        let first_tried: parking_lot::Mutex<Option<String>> = parking_lot::Mutex::new(None);
        let calls = AtomicU32::new(0);
        let result = lb
            .execute("api", |instance| {
                calls.fetch_add(1, Ordering::Relaxed);
                let fail = {
                    let mut first = first_tried.lock();
                    match &*first {
                        None => {
                            *first = Some(instance.id.clone());
                            true
                        }
                        Some(id) => *id == instance.id,
                    }
                };
                async move {
                    if fail {
                        anyhow::bail!("connection refused");
                    }
                    Ok(instance.id)
                }
            })
            .await;

        let winner = result.expect("a healthy instance serves the request");
        let condemned = first_tried.lock().clone().unwrap();
        assert_ne!(winner, condemned);
        assert!(
            !registry.get(&condemned).unwrap().healthy,
            "failed instance condemned"
        );
        assert_eq!(calls.load(Ordering::Relaxed), 2);
        assert_eq!(lb.metrics.lb_failover.get(), 1);
    }

    #[tokio::test]
    async fn test_all_instances_failing_is_an_error() {
        let (lb, registry) = balancer(3);
        registry.register("api", "10.0.0.1", 8000, 1);
        registry.register("api", "10.0.0.2", 8000, 1);

        let result: Result<(), OpsError> = lb
            .execute("api", |_| async { anyhow::bail!("boom") })
            .await;
        assert!(matches!(
            result,
            Err(OpsError::AllInstancesFailed { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_service_is_no_instances() {
        let (lb, _registry) = balancer(3);
        let result: Result<(), OpsError> =
            lb.execute("ghost", |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(OpsError::NoInstances(_))));
    }

    #[tokio::test]
    async fn test_distinct_instances_per_attempt() {
        let (lb, registry) = balancer(5);
        for i in 1..=3 {
            registry.register("api", &format!("10.0.0.{}", i), 8000, 1);
        }

        let seen = parking_lot::Mutex::new(Vec::<String>::new());
        let _ = lb
            .execute("api", |instance| {
                seen.lock().push(instance.id.clone());
                async { Err::<(), _>(anyhow::anyhow!("always fails")) }
            })
            .await;

        let seen = seen.into_inner();
        assert_eq!(seen.len(), 3, "one attempt per distinct instance");
        let unique: HashSet<&String> = seen.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn test_fan_out_hits_every_healthy_instance() {
        let (lb, registry) = balancer(3);
        registry.register("api", "10.0.0.1", 8000, 1);
        registry.register("api", "10.0.0.2", 8000, 1);
        let down = registry.register("api", "10.0.0.3", 8000, 1);
        for _ in 0..3 {
            registry.record_probe_failure(&down.id);
        }

        let results = lb
            .fan_out("api", |instance| async move { Ok(instance.port) })
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }
}
