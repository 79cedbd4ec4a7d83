//! Request admission control flow end to end:
//! rate limiter -> throttler -> load balancer -> metrics.

use medrota_ops::kv::MemoryKv;
use medrota_ops::loadbalance::{
    LoadBalancer, RegistryConfig, SelectionStrategy, ServiceRegistry,
};
use medrota_ops::metrics::OpsMetrics;
use medrota_ops::ratelimit::RateLimiter;
use medrota_ops::throttle::{
    AdmitDecision, Priority, StrategyKind, ThrottleConfig, Throttler,
};
use std::sync::Arc;
use std::time::Duration;

struct Pipeline {
    limiter: RateLimiter,
    throttler: Throttler,
    balancer: LoadBalancer,
    metrics: Arc<OpsMetrics>,
}

fn pipeline() -> Pipeline {
    let metrics = Arc::new(OpsMetrics::new().unwrap());
    let kv = Arc::new(MemoryKv::new());
    let registry = Arc::new(ServiceRegistry::new(RegistryConfig::default()));
    registry.register("scheduler", "10.0.0.1", 8000, 1);
    registry.register("scheduler", "10.0.0.2", 8000, 1);

    Pipeline {
        limiter: RateLimiter::new(kv, metrics.clone()),
        throttler: Throttler::new(
            ThrottleConfig {
                max_concurrent: 2,
                max_queue: 4,
                queue_timeout: Duration::from_millis(200),
                strategy: StrategyKind::Queued,
                ..ThrottleConfig::default()
            },
            metrics.clone(),
        ),
        balancer: LoadBalancer::new(
            registry,
            SelectionStrategy::default(),
            metrics.clone(),
            3,
        ),
        metrics,
    }
}

/// One request through every admission gate to a downstream call.
#[tokio::test]
async fn test_admitted_request_flows_to_an_instance() {
    let p = pipeline();
    let now = 1_700_000_000_000;

    let decision = p
        .limiter
        .check_at("client-1", Some("coordinator"), "people.list", now)
        .await;
    assert!(decision.allowed);

    let permit = match p.throttler.admit_with_priority(Priority::Normal) {
        AdmitDecision::Allow(permit) => permit,
        _ => panic!("idle throttler must admit immediately"),
    };

    let served_by = p
        .balancer
        .execute("scheduler", |instance| async move { Ok(instance.host) })
        .await
        .unwrap();
    assert!(served_by.starts_with("10.0.0."));
    permit.release();

    assert_eq!(p.metrics.rate_limit_allow.get(), 1);
    assert_eq!(p.metrics.throttle_allow.get(), 1);
    assert_eq!(p.metrics.lb_requests_total.get(), 1);
    assert_eq!(p.metrics.throttle_active.get(), 0);
}

/// A rate-limited client never reaches the throttler or balancer.
#[tokio::test]
async fn test_denied_request_stops_at_the_limiter() {
    let p = pipeline();
    let now = 1_700_000_000_000;

    // Free tier bursts at 5; the sixth immediate request is denied.
    let mut denied = None;
    for i in 0..6 {
        let decision = p
            .limiter
            .check_at("anon", None, "people.list", now + i)
            .await;
        if !decision.allowed {
            denied = Some(decision);
            break;
        }
    }
    let denied = denied.expect("free tier burst exhausts at five");
    assert!(denied.retry_after_secs.is_some());

    assert_eq!(p.metrics.rate_limit_deny.get(), 1);
    assert_eq!(p.metrics.throttle_allow.get(), 0);
    assert_eq!(p.metrics.lb_requests_total.get(), 0);
}

/// Saturated throttler queues the overflow; released slots drain it.
#[tokio::test]
async fn test_throttle_queue_drains_through_the_pipeline() {
    let p = pipeline();

    let p1 = match p.throttler.admit_with_priority(Priority::Normal) {
        AdmitDecision::Allow(permit) => permit,
        _ => panic!("first admit"),
    };
    let _p2 = match p.throttler.admit_with_priority(Priority::Normal) {
        AdmitDecision::Allow(permit) => permit,
        _ => panic!("second admit"),
    };
    let waiter = match p.throttler.admit_with_priority(Priority::Normal) {
        AdmitDecision::Queue(waiter) => waiter,
        _ => panic!("third admit must queue"),
    };
    assert_eq!(p.metrics.throttle_queued.get(), 1);

    drop(p1);
    let p3 = waiter.wait().await.expect("freed slot reaches the waiter");

    // The drained request still reaches a healthy instance.
    let port = p
        .balancer
        .execute("scheduler", |instance| async move { Ok(instance.port) })
        .await
        .unwrap();
    assert_eq!(port, 8000);
    drop(p3);
    assert_eq!(p.metrics.throttle_active.get(), 1, "one permit still held");
}
