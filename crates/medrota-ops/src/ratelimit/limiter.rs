//! Layered admission control: token bucket plus sliding windows.
//!
//! Both gates are evaluated in one atomic store operation and both must
//! pass. Store failures fail open: limiting is an optimization, never a
//! reason to drop traffic.

use crate::kv::{AtomicOp, AtomicOutcome, DeniedBy, KvStore};
use crate::metrics::OpsMetrics;
use crate::ratelimit::tiers::{
    endpoint_limit, tier_config, tier_for_role, RateLimitTier, TierConfig,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Bucket/window state TTL; idle clients age out of the store.
const STATE_TTL: Duration = Duration::from_secs(3600);

/// Outcome of one admission check, with everything the HTTP collaborator
/// needs for response headers.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub tier: RateLimitTier,
    pub minute_remaining: u64,
    pub hour_remaining: u64,
    pub burst_remaining: u64,
    /// Epoch seconds when the minute window resets.
    pub reset_at: i64,
    pub retry_after_secs: Option<u64>,
}

impl RateLimitDecision {
    fn unlimited(tier: RateLimitTier, now_ms: i64) -> Self {
        Self {
            allowed: true,
            tier,
            minute_remaining: u64::MAX,
            hour_remaining: u64::MAX,
            burst_remaining: u64::MAX,
            reset_at: now_ms / 1000,
            retry_after_secs: None,
        }
    }

    /// Header set the HTTP layer attaches to every response.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            (
                "X-RateLimit-Remaining-Minute".to_string(),
                self.minute_remaining.to_string(),
            ),
            (
                "X-RateLimit-Remaining-Hour".to_string(),
                self.hour_remaining.to_string(),
            ),
            ("X-RateLimit-Reset".to_string(), self.reset_at.to_string()),
            ("X-RateLimit-Tier".to_string(), self.tier.to_string()),
            (
                "X-RateLimit-Burst-Remaining".to_string(),
                self.burst_remaining.to_string(),
            ),
        ];
        if let Some(retry_after) = self.retry_after_secs {
            headers.push(("Retry-After".to_string(), retry_after.to_string()));
        }
        headers
    }
}

pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    metrics: Arc<OpsMetrics>,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, metrics: Arc<OpsMetrics>) -> Self {
        Self { kv, metrics }
    }

    /// Decide admission for (client, endpoint) under the role's tier.
    pub async fn check(
        &self,
        client_id: &str,
        role: Option<&str>,
        endpoint: &str,
    ) -> RateLimitDecision {
        self.check_at(client_id, role, endpoint, Utc::now().timestamp_millis())
            .await
    }

    /// Admission check against an explicit clock (deterministic tests).
    pub async fn check_at(
        &self,
        client_id: &str,
        role: Option<&str>,
        endpoint: &str,
        now_ms: i64,
    ) -> RateLimitDecision {
        let timer = self.metrics.rate_limit_check_duration.start_timer();
        let tier = tier_for_role(role);

        if tier == RateLimitTier::Internal {
            timer.observe_duration();
            self.metrics.rate_limit_allow.inc();
            return RateLimitDecision::unlimited(tier, now_ms);
        }

        // Custom per-client policy overrides tier defaults while its TTL
        // lasts; afterwards the client falls back to the role tier.
        let mut config = match self.custom_policy(client_id).await {
            Some(custom) => custom,
            None => tier_config(tier),
        };
        let scope = match endpoint_limit(endpoint) {
            Some(limit) => {
                config = config.tightened_by(limit);
                endpoint
            }
            None => "global",
        };

        let op = AtomicOp::RateLimitCheck {
            bucket_key: format!("rate:bucket:{}:{}", client_id, scope),
            minute_key: format!("rate:window:60:{}:{}", client_id, scope),
            hour_key: format!("rate:window:3600:{}:{}", client_id, scope),
            capacity: config.burst_size as f64,
            refill_rate: config.burst_refill_rate,
            per_minute: config.requests_per_minute,
            per_hour: config.requests_per_hour,
            now_ms,
            state_ttl: STATE_TTL,
        };

        let raw = match self.kv.eval(op).await {
            Ok(AtomicOutcome::RateLimit(raw)) => raw,
            Ok(_) | Err(_) => {
                // Fail open: never block traffic on an infrastructure
                // fault.
                self.metrics.rate_limit_store_error.inc();
                self.metrics.rate_limit_allow.inc();
                timer.observe_duration();
                tracing::warn!(client_id, endpoint, "rate-limit store error, failing open");
                return RateLimitDecision::unlimited(tier, now_ms);
            }
        };

        if raw.allowed {
            self.metrics.rate_limit_allow.inc();
        } else {
            self.metrics.rate_limit_deny.inc();
        }

        let retry_after_secs = raw.denied_by.map(|denied| match denied {
            DeniedBy::Burst => {
                // Seconds until one full token refills.
                let deficit = (1.0 - raw.tokens_remaining).max(0.0);
                (deficit / config.burst_refill_rate).ceil().max(1.0) as u64
            }
            DeniedBy::MinuteWindow => {
                (((raw.minute_reset_ms - now_ms).max(0)) as f64 / 1000.0).ceil() as u64
            }
            DeniedBy::HourWindow => {
                (((raw.hour_reset_ms - now_ms).max(0)) as f64 / 1000.0).ceil() as u64
            }
        });

        timer.observe_duration();
        RateLimitDecision {
            allowed: raw.allowed,
            tier,
            minute_remaining: config.requests_per_minute.saturating_sub(raw.minute_count),
            hour_remaining: config.requests_per_hour.saturating_sub(raw.hour_count),
            burst_remaining: raw.tokens_remaining.max(0.0) as u64,
            reset_at: raw.minute_reset_ms / 1000,
            retry_after_secs,
        }
    }

    /// Install a custom policy for one client. When the TTL lapses the
    /// client reverts to its role tier.
    pub async fn set_custom_policy(
        &self,
        client_id: &str,
        config: &TierConfig,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        let value = serde_json::to_string(config)?;
        self.kv
            .set_ex(&policy_key(client_id), &value, ttl)
            .await?;
        Ok(())
    }

    pub async fn clear_custom_policy(&self, client_id: &str) -> anyhow::Result<()> {
        self.kv.delete(&policy_key(client_id)).await?;
        Ok(())
    }

    async fn custom_policy(&self, client_id: &str) -> Option<TierConfig> {
        let raw = self.kv.get(&policy_key(client_id)).await.ok()??;
        match serde_json::from_str(&raw) {
            Ok(config) => Some(config),
            Err(err) => {
                // Corrupt policy entries are discarded, not fatal.
                tracing::warn!(client_id, error = %err, "discarding malformed custom rate policy");
                None
            }
        }
    }
}

fn policy_key(client_id: &str) -> String {
    format!("rate:policy:{}", client_id)
}
