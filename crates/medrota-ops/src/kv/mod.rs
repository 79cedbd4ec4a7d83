//! Key-value store abstraction.
//!
//! The operational components (rate limiter, permission cache, snapshot
//! store) share one Redis-shaped seam. Multi-step updates that must be
//! atomic per key group are modeled as [`AtomicOp`] variants rather than
//! client-side lock sequences; a networked implementation maps each variant
//! to a server-side script, the in-process implementation runs it under one
//! lock.

pub mod memory;

pub use memory::MemoryKv;

use crate::error::OpsError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Scripted multi-step updates, executed atomically by the store.
#[derive(Debug, Clone)]
pub enum AtomicOp {
    /// Combined rate-limit admission: refill + consume the token bucket and
    /// prune + count + insert into both sliding windows, as one decision.
    RateLimitCheck {
        bucket_key: String,
        minute_key: String,
        hour_key: String,
        capacity: f64,
        refill_rate: f64,
        per_minute: u64,
        per_hour: u64,
        now_ms: i64,
        state_ttl: Duration,
    },
    /// Remove every key referenced by a tag set, then the tag set itself.
    TagInvalidate { tag_key: String },
}

/// Typed results of [`AtomicOp`] execution.
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicOutcome {
    RateLimit(RateLimitRaw),
    Invalidated { removed: u64 },
}

/// Raw admission numbers produced inside the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitRaw {
    pub allowed: bool,
    /// Which gate denied, when denied.
    pub denied_by: Option<DeniedBy>,
    pub tokens_remaining: f64,
    pub minute_count: u64,
    pub hour_count: u64,
    /// Epoch millis when the oldest minute-window entry expires.
    pub minute_reset_ms: i64,
    pub hour_reset_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeniedBy {
    Burst,
    MinuteWindow,
    HourWindow,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, OpsError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), OpsError>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), OpsError>;
    async fn delete(&self, key: &str) -> Result<bool, OpsError>;
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, OpsError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, OpsError>;

    // Sorted sets (sliding windows)
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), OpsError>;
    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64)
        -> Result<u64, OpsError>;
    async fn zcard(&self, key: &str) -> Result<u64, OpsError>;
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, OpsError>;

    // Sets (tag membership)
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, OpsError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, OpsError>;
    async fn srem(&self, key: &str, member: &str) -> Result<bool, OpsError>;

    // Hashes (bucket state, job records)
    async fn hset_all(&self, key: &str, fields: HashMap<String, String>)
        -> Result<(), OpsError>;
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, OpsError>;
    /// Selected hash fields, positionally; missing fields yield `None`.
    async fn hmget(
        &self,
        key: &str,
        fields: &[&str],
    ) -> Result<Vec<Option<String>>, OpsError>;

    /// Pattern iteration; `pattern` supports `*` wildcards. Returns
    /// `(next_cursor, keys)`; a zero next cursor ends the scan.
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: u64,
    ) -> Result<(u64, Vec<String>), OpsError>;

    /// Execute a scripted multi-step update atomically.
    async fn eval(&self, op: AtomicOp) -> Result<AtomicOutcome, OpsError>;
}
