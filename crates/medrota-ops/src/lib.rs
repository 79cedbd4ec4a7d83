//! Operational control plane for the scheduling platform.
//!
//! Everything that sits in front of a request path or behind a background
//! loop: rate limiting, concurrency throttling, load balancing with health
//! probing, persistent background jobs, solver checkpoint storage, and the
//! permission cache. Shared state goes through the [`kv::KvStore`] seam;
//! observability goes through [`metrics::OpsMetrics`]. All long-lived
//! loops expose `start`/`stop` and shut down cooperatively.

pub mod cache;
pub mod config;
pub mod error;
pub mod jobs;
pub mod kv;
pub mod loadbalance;
pub mod metrics;
pub mod ratelimit;
pub mod snapshot;
pub mod throttle;

pub use cache::PermissionCache;
pub use config::OpsConfig;
pub use error::{OpsError, Result};
pub use jobs::{JobRegistry, JobScheduler, JobStore, MemoryJobStore, SchedulerConfig, TriggerSpec};
pub use kv::{KvStore, MemoryKv};
pub use loadbalance::{
    HealthProber, LoadBalancer, ProbeConfig, ProbeKind, RegistryConfig, SelectionStrategy,
    ServiceInstance, ServiceRegistry,
};
pub use metrics::OpsMetrics;
pub use ratelimit::{RateLimitDecision, RateLimitTier, RateLimiter, TierConfig};
pub use snapshot::KvCheckpointStore;
pub use throttle::{
    AdmitDecision, Permit, Priority, QueuedWaiter, RejectReason, StrategyKind, ThrottleConfig,
    Throttler,
};
