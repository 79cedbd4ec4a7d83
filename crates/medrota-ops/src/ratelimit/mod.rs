/// Multi-tier rate limiting: token bucket for bursts layered with 60s and
/// 3600s sliding windows for sustained rate, per (client, endpoint).
pub mod limiter;
pub mod tiers;

pub use limiter::{RateLimitDecision, RateLimiter};
pub use tiers::{
    endpoint_limit, tier_config, tier_for_role, EndpointLimit, RateLimitTier, TierConfig,
};
