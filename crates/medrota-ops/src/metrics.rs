//! Prometheus metrics for the operational components.
//!
//! One [`OpsMetrics`] value is created at process startup and handed to
//! each component; there is no global registry.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};

pub struct OpsMetrics {
    registry: Registry,

    // Rate limiter
    pub rate_limit_allow: IntCounter,
    pub rate_limit_deny: IntCounter,
    pub rate_limit_store_error: IntCounter,
    pub rate_limit_check_duration: Histogram,

    // Throttler
    pub throttle_allow: IntCounter,
    pub throttle_queue: IntCounter,
    pub throttle_reject: IntCounter,
    pub throttle_timeout: IntCounter,
    pub throttle_wait_duration: Histogram,
    pub throttle_active: IntGauge,
    pub throttle_queued: IntGauge,

    // Load balancer
    pub lb_requests_total: IntCounter,
    pub lb_requests_failed: IntCounter,
    pub lb_failover: IntCounter,
    pub lb_healthy_instances: IntGauge,
    pub probe_duration: Histogram,

    // Job scheduler
    pub job_success: IntCounter,
    pub job_failure: IntCounter,
    pub job_missed: IntCounter,
    pub jobs_enabled: IntGauge,

    // Solver
    pub solver_iteration_duration: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> anyhow::Result<IntCounter> {
    let c = IntCounter::new(name, help)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> anyhow::Result<IntGauge> {
    let g = IntGauge::new(name, help)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn histogram(registry: &Registry, name: &str, help: &str) -> anyhow::Result<Histogram> {
    let h = Histogram::with_opts(HistogramOpts::new(name, help))?;
    registry.register(Box::new(h.clone()))?;
    Ok(h)
}

impl OpsMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        Ok(Self {
            rate_limit_allow: counter(&registry, "rate_limit_allow", "Requests admitted by the rate limiter")?,
            rate_limit_deny: counter(&registry, "rate_limit_deny", "Requests denied by the rate limiter")?,
            rate_limit_store_error: counter(&registry,
                "rate_limit_store_error",
                "Rate-limit checks that failed open on store errors",
            )?,
            rate_limit_check_duration: histogram(
                &registry,
                "rate_limit_check_duration_seconds",
                "Rate-limit check latency",
            )?,

            throttle_allow: counter(&registry, "throttle_allow", "Requests admitted immediately")?,
            throttle_queue: counter(&registry, "throttle_queue", "Requests placed in the wait queue")?,
            throttle_reject: counter(&registry, "throttle_reject", "Requests rejected by the throttler")?,
            throttle_timeout: counter(&registry, "throttle_timeout", "Queued requests that timed out")?,
            throttle_wait_duration: histogram(
                &registry,
                "throttle_wait_duration_seconds",
                "Time spent waiting in the throttle queue",
            )?,
            throttle_active: gauge(&registry, "throttle_active", "In-flight requests holding a slot")?,
            throttle_queued: gauge(&registry, "throttle_queued", "Requests currently queued")?,

            lb_requests_total: counter(&registry, "lb_request_total", "Load-balanced requests")?,
            lb_requests_failed: counter(&registry, "lb_request_failed", "Load-balanced requests that failed")?,
            lb_failover: counter(&registry, "lb_request_failover", "Failover retries performed")?,
            lb_healthy_instances: gauge(&registry, "lb_healthy_instances", "Currently healthy instances")?,
            probe_duration: histogram(&registry, "probe_duration_seconds", "Health probe latency")?,

            job_success: counter(&registry, "job_run_success", "Job executions that succeeded")?,
            job_failure: counter(&registry, "job_run_failure", "Job executions that failed")?,
            job_missed: counter(&registry, "job_run_missed", "Job firings skipped past misfire grace")?,
            jobs_enabled: gauge(&registry, "jobs_enabled", "Enabled jobs installed in the scheduler")?,

            solver_iteration_duration: histogram(
                &registry,
                "solver_iteration_duration_seconds",
                "Solver search iteration latency",
            )?,

            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the whole registry in the Prometheus text exposition format.
    pub fn gather_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_render() {
        let metrics = OpsMetrics::new().unwrap();
        metrics.rate_limit_allow.inc();
        metrics.throttle_active.set(3);
        let text = metrics.gather_text().unwrap();
        assert!(text.contains("rate_limit_allow 1"));
        assert!(text.contains("throttle_active 3"));
    }
}
