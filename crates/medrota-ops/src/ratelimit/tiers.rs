//! Rate limit tiers and per-endpoint overrides.

use serde::{Deserialize, Serialize};

/// Tiers keyed off user roles. Higher tiers get more requests and higher
/// burst capacity; `Internal` bypasses limiting entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitTier {
    Free,
    Standard,
    Premium,
    Admin,
    Internal,
}

impl RateLimitTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Standard => "standard",
            Self::Premium => "premium",
            Self::Admin => "admin",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for RateLimitTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Limits for one tier: sliding windows for sustained rate, token bucket
/// for bursts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub requests_per_minute: u64,
    pub requests_per_hour: u64,
    /// Token bucket capacity.
    pub burst_size: u64,
    /// Tokens added per second.
    pub burst_refill_rate: f64,
}

impl TierConfig {
    /// Apply an endpoint override; overrides only ever tighten.
    pub fn tightened_by(&self, limit: &EndpointLimit) -> Self {
        Self {
            requests_per_minute: limit
                .requests_per_minute
                .map_or(self.requests_per_minute, |v| v.min(self.requests_per_minute)),
            requests_per_hour: limit
                .requests_per_hour
                .map_or(self.requests_per_hour, |v| v.min(self.requests_per_hour)),
            burst_size: limit
                .burst_size
                .map_or(self.burst_size, |v| v.min(self.burst_size)),
            burst_refill_rate: self.burst_refill_rate,
        }
    }
}

/// Per-endpoint override for expensive paths.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointLimit {
    pub endpoint: &'static str,
    pub requests_per_minute: Option<u64>,
    pub requests_per_hour: Option<u64>,
    pub burst_size: Option<u64>,
}

pub fn tier_config(tier: RateLimitTier) -> TierConfig {
    match tier {
        RateLimitTier::Free => TierConfig {
            requests_per_minute: 10,
            requests_per_hour: 100,
            burst_size: 5,
            burst_refill_rate: 0.16,
        },
        RateLimitTier::Standard => TierConfig {
            requests_per_minute: 60,
            requests_per_hour: 1000,
            burst_size: 20,
            burst_refill_rate: 1.0,
        },
        RateLimitTier::Premium => TierConfig {
            requests_per_minute: 120,
            requests_per_hour: 5000,
            burst_size: 50,
            burst_refill_rate: 2.0,
        },
        RateLimitTier::Admin => TierConfig {
            requests_per_minute: 300,
            requests_per_hour: 10_000,
            burst_size: 100,
            burst_refill_rate: 5.0,
        },
        RateLimitTier::Internal => TierConfig {
            requests_per_minute: u64::MAX,
            requests_per_hour: u64::MAX,
            burst_size: u64::MAX,
            burst_refill_rate: f64::INFINITY,
        },
    }
}

/// Map a user role onto its tier. Unauthenticated clients are `Free`.
pub fn tier_for_role(role: Option<&str>) -> RateLimitTier {
    let Some(role) = role else {
        return RateLimitTier::Free;
    };
    match role.to_ascii_lowercase().as_str() {
        "admin" => RateLimitTier::Admin,
        "coordinator" | "faculty" => RateLimitTier::Premium,
        "resident" | "clinical_staff" => RateLimitTier::Standard,
        "internal" => RateLimitTier::Internal,
        _ => RateLimitTier::Free,
    }
}

/// Overrides for expensive endpoints, matched by exact name or a trailing
/// `*` prefix pattern.
const ENDPOINT_LIMITS: &[EndpointLimit] = &[
    EndpointLimit {
        endpoint: "schedule.generate",
        requests_per_minute: Some(2),
        requests_per_hour: Some(20),
        burst_size: Some(1),
    },
    EndpointLimit {
        endpoint: "analytics.complex",
        requests_per_minute: Some(5),
        requests_per_hour: Some(50),
        burst_size: Some(2),
    },
    EndpointLimit {
        endpoint: "auth.login",
        requests_per_minute: Some(5),
        requests_per_hour: Some(20),
        burst_size: Some(3),
    },
];

pub fn endpoint_limit(endpoint: &str) -> Option<&'static EndpointLimit> {
    if let Some(limit) = ENDPOINT_LIMITS.iter().find(|l| l.endpoint == endpoint) {
        return Some(limit);
    }
    ENDPOINT_LIMITS.iter().find(|l| {
        l.endpoint
            .strip_suffix('*')
            .map_or(false, |prefix| endpoint.starts_with(prefix))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_mapping() {
        assert_eq!(tier_for_role(Some("admin")), RateLimitTier::Admin);
        assert_eq!(tier_for_role(Some("Faculty")), RateLimitTier::Premium);
        assert_eq!(tier_for_role(Some("coordinator")), RateLimitTier::Premium);
        assert_eq!(tier_for_role(Some("resident")), RateLimitTier::Standard);
        assert_eq!(tier_for_role(Some("clinical_staff")), RateLimitTier::Standard);
        assert_eq!(tier_for_role(Some("visitor")), RateLimitTier::Free);
        assert_eq!(tier_for_role(None), RateLimitTier::Free);
    }

    #[test]
    fn test_endpoint_override_tightens_but_never_loosens() {
        let standard = tier_config(RateLimitTier::Standard);
        let limit = endpoint_limit("schedule.generate").unwrap();
        let effective = standard.tightened_by(limit);
        assert_eq!(effective.requests_per_minute, 2);
        assert_eq!(effective.requests_per_hour, 20);
        assert_eq!(effective.burst_size, 1);

        // A "loosening" override cannot raise the free tier's caps.
        let free = tier_config(RateLimitTier::Free);
        let loose = EndpointLimit {
            endpoint: "x",
            requests_per_minute: Some(1000),
            requests_per_hour: None,
            burst_size: None,
        };
        assert_eq!(free.tightened_by(&loose).requests_per_minute, 10);
    }

    #[test]
    fn test_unknown_endpoint_has_no_override() {
        assert!(endpoint_limit("people.list").is_none());
    }
}
