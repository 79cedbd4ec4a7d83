//! Instance selection strategies.
//!
//! Strategies are tagged variants applied by the balancer; `HealthBased`
//! filters to the selectable set and delegates to an inner variant.

use crate::loadbalance::registry::ServiceInstance;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub enum SelectionStrategy {
    /// Wrap-around cursor per service.
    RoundRobin,
    /// Cumulative-weight selection.
    Weighted,
    /// Fewest in-flight requests, ties by id.
    LeastConnections,
    /// Filter unhealthy instances, then delegate.
    HealthBased(Box<SelectionStrategy>),
}

impl Default for SelectionStrategy {
    fn default() -> Self {
        SelectionStrategy::HealthBased(Box::new(SelectionStrategy::RoundRobin))
    }
}

/// Mutable selection state owned by the balancer, shared across calls.
#[derive(Default)]
pub struct StrategyState {
    /// Round-robin cursors per service.
    cursors: Mutex<HashMap<String, usize>>,
    /// In-flight request counts per instance id.
    connections: Mutex<HashMap<String, usize>>,
}

impl StrategyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_started(&self, instance_id: &str) {
        *self
            .connections
            .lock()
            .entry(instance_id.to_string())
            .or_insert(0) += 1;
    }

    pub fn connection_finished(&self, instance_id: &str) {
        let mut connections = self.connections.lock();
        if let Some(count) = connections.get_mut(instance_id) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn connections_of(&self, instance_id: &str) -> usize {
        self.connections.lock().get(instance_id).copied().unwrap_or(0)
    }
}

impl SelectionStrategy {
    /// Pick an instance from the candidates. Candidates must belong to one
    /// service and arrive in deterministic (id) order.
    pub fn select(
        &self,
        service_name: &str,
        candidates: &[ServiceInstance],
        state: &StrategyState,
    ) -> Option<ServiceInstance> {
        if candidates.is_empty() {
            return None;
        }
        match self {
            SelectionStrategy::RoundRobin => {
                let mut cursors = state.cursors.lock();
                let cursor = cursors.entry(service_name.to_string()).or_insert(0);
                let picked = candidates[*cursor % candidates.len()].clone();
                *cursor = (*cursor + 1) % candidates.len();
                Some(picked)
            }
            SelectionStrategy::Weighted => {
                let total: u64 = candidates.iter().map(|i| i.weight as u64).sum();
                if total == 0 {
                    return candidates.first().cloned();
                }
                let mut point = rand::thread_rng().gen_range(0..total);
                for instance in candidates {
                    let weight = instance.weight as u64;
                    if point < weight {
                        return Some(instance.clone());
                    }
                    point -= weight;
                }
                candidates.last().cloned()
            }
            SelectionStrategy::LeastConnections => candidates
                .iter()
                .min_by_key(|i| (state.connections_of(&i.id), i.id.clone()))
                .cloned(),
            SelectionStrategy::HealthBased(inner) => {
                let healthy: Vec<ServiceInstance> = candidates
                    .iter()
                    .filter(|i| i.healthy)
                    .cloned()
                    .collect();
                inner.select(service_name, &healthy, state)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn instance(id: &str, weight: u32, healthy: bool) -> ServiceInstance {
        ServiceInstance {
            id: id.to_string(),
            service_name: "api".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            weight,
            healthy,
            consecutive_failures: 0,
            registered_at: Utc::now(),
            last_health_check: None,
        }
    }

    #[test]
    fn test_round_robin_wraps() {
        let state = StrategyState::new();
        let strategy = SelectionStrategy::RoundRobin;
        let candidates = vec![instance("a", 1, true), instance("b", 1, true)];

        let picks: Vec<String> = (0..4)
            .map(|_| strategy.select("api", &candidates, &state).unwrap().id)
            .collect();
        assert_eq!(picks, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_round_robin_cursors_are_per_service() {
        let state = StrategyState::new();
        let strategy = SelectionStrategy::RoundRobin;
        let api = vec![instance("a", 1, true), instance("b", 1, true)];
        let workers = vec![instance("w1", 1, true), instance("w2", 1, true)];

        assert_eq!(strategy.select("api", &api, &state).unwrap().id, "a");
        assert_eq!(strategy.select("worker", &workers, &state).unwrap().id, "w1");
        assert_eq!(strategy.select("api", &api, &state).unwrap().id, "b");
    }

    #[test]
    fn test_weighted_respects_zero_candidates() {
        let state = StrategyState::new();
        let strategy = SelectionStrategy::Weighted;
        assert!(strategy.select("api", &[], &state).is_none());
    }

    #[test]
    fn test_weighted_prefers_heavier_instances() {
        let state = StrategyState::new();
        let strategy = SelectionStrategy::Weighted;
        let candidates = vec![instance("light", 1, true), instance("heavy", 99, true)];

        let mut heavy_hits = 0;
        for _ in 0..200 {
            if strategy.select("api", &candidates, &state).unwrap().id == "heavy" {
                heavy_hits += 1;
            }
        }
        assert!(heavy_hits > 150, "heavy picked only {}/200", heavy_hits);
    }

    #[test]
    fn test_least_connections_picks_idle_instance() {
        let state = StrategyState::new();
        let strategy = SelectionStrategy::LeastConnections;
        let candidates = vec![instance("a", 1, true), instance("b", 1, true)];

        state.connection_started("a");
        state.connection_started("a");
        state.connection_started("b");
        assert_eq!(strategy.select("api", &candidates, &state).unwrap().id, "b");

        state.connection_finished("a");
        state.connection_finished("a");
        assert_eq!(strategy.select("api", &candidates, &state).unwrap().id, "a");
    }

    #[test]
    fn test_health_based_filters_then_delegates() {
        let state = StrategyState::new();
        let strategy = SelectionStrategy::default();
        let candidates = vec![
            instance("down", 1, false),
            instance("up", 1, true),
        ];
        for _ in 0..3 {
            assert_eq!(
                strategy.select("api", &candidates, &state).unwrap().id,
                "up"
            );
        }
        let all_down = vec![instance("down", 1, false)];
        assert!(strategy.select("api", &all_down, &state).is_none());
    }
}
