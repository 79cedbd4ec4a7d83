//! Environment-driven configuration for the control plane.
//!
//! Every knob has a default suitable for single-node deployments; the
//! `MEDROTA_*` variables override individual values.

use crate::jobs::SchedulerConfig;
use crate::loadbalance::{ProbeConfig, RegistryConfig};
use crate::throttle::{StrategyKind, ThrottleConfig};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OpsConfig {
    pub throttle: ThrottleConfig,
    pub registry: RegistryConfig,
    pub probe: ProbeConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            throttle: ThrottleConfig::default(),
            registry: RegistryConfig::default(),
            probe: ProbeConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl OpsConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(limit) = env_parse::<usize>("MEDROTA_MAX_CONCURRENT") {
            config.throttle.max_concurrent = limit;
        }
        if let Some(queue) = env_parse::<usize>("MEDROTA_MAX_QUEUE") {
            config.throttle.max_queue = queue;
        }
        if let Some(secs) = env_parse::<u64>("MEDROTA_QUEUE_TIMEOUT_SECS") {
            config.throttle.queue_timeout = Duration::from_secs(secs);
        }
        if let Some(strategy) = env::var("MEDROTA_THROTTLE_STRATEGY").ok() {
            config.throttle.strategy = match strategy.as_str() {
                "simple" => StrategyKind::Simple,
                "queued" => StrategyKind::Queued,
                "priority" => StrategyKind::Priority,
                _ => StrategyKind::Adaptive,
            };
        }

        if let Some(threshold) = env_parse::<u32>("MEDROTA_FAILURE_THRESHOLD") {
            config.registry.failure_threshold = threshold;
        }
        if let Some(secs) = env_parse::<u64>("MEDROTA_STALE_THRESHOLD_SECS") {
            config.registry.stale_threshold = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("MEDROTA_PROBE_INTERVAL_SECS") {
            config.probe.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("MEDROTA_PROBE_TIMEOUT_SECS") {
            config.probe.timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = env_parse::<u64>("MEDROTA_MISFIRE_GRACE_SECS") {
            config.scheduler.misfire_grace = Duration::from_secs(secs);
        }
        if let Some(max) = env_parse::<usize>("MEDROTA_JOB_MAX_INSTANCES") {
            config.scheduler.max_instances = max;
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| raw.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        let config = OpsConfig::default();
        assert_eq!(config.throttle.max_concurrent, 100);
        assert_eq!(config.registry.failure_threshold, 3);
        assert_eq!(config.scheduler.max_instances, 1);
    }

    #[test]
    fn test_env_parse_ignores_garbage() {
        std::env::set_var("MEDROTA_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_parse::<u64>("MEDROTA_TEST_GARBAGE"), None);
        std::env::remove_var("MEDROTA_TEST_GARBAGE");
    }
}
