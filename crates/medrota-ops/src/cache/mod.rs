//! Cached role and user permissions with TTL and tag invalidation.
//!
//! Role permission sets are stable (24h TTL); per-user sets change more
//! often (1h TTL). Entries may carry tags (`user:{id}`); invalidating a
//! tag removes every entry bearing it in one atomic multi-key operation.
//!
//! The cache is an optimization, so the failure policy is soft: a store
//! error reads as a miss and the caller recomputes; writes fail silently
//! with a warning log.

use crate::kv::{AtomicOp, KvStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const ROLE_TTL: Duration = Duration::from_secs(86_400);
const USER_TTL: Duration = Duration::from_secs(3_600);

pub struct PermissionCache {
    kv: Arc<dyn KvStore>,
}

impl PermissionCache {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn role_key(role: &str) -> String {
        format!("perm:role:{}", role)
    }

    fn user_key(user_id: &str) -> String {
        format!("perm:user:{}", user_id)
    }

    fn tag_key(tag: &str) -> String {
        format!("perm:tag:{}", tag)
    }

    /// Cached permission set for a role; `None` is a miss.
    pub async fn get_role_permissions(&self, role: &str) -> Option<HashSet<String>> {
        self.read(&Self::role_key(role)).await
    }

    pub async fn set_role_permissions(
        &self,
        role: &str,
        permissions: &HashSet<String>,
        ttl: Option<Duration>,
    ) {
        self.write(
            &Self::role_key(role),
            permissions,
            ttl.unwrap_or(ROLE_TTL),
            &[],
        )
        .await;
    }

    /// Cached effective permissions for a user; `None` is a miss.
    pub async fn get_user_permissions(&self, user_id: &str) -> Option<HashSet<String>> {
        self.read(&Self::user_key(user_id)).await
    }

    pub async fn set_user_permissions(
        &self,
        user_id: &str,
        permissions: &HashSet<String>,
        ttl: Option<Duration>,
    ) {
        let tag = format!("user:{}", user_id);
        self.write(
            &Self::user_key(user_id),
            permissions,
            ttl.unwrap_or(USER_TTL),
            &[tag],
        )
        .await;
    }

    /// Remove every cache entry bearing the tag, atomically.
    pub async fn invalidate_tag(&self, tag: &str) -> u64 {
        match self
            .kv
            .eval(AtomicOp::TagInvalidate {
                tag_key: Self::tag_key(tag),
            })
            .await
        {
            Ok(crate::kv::AtomicOutcome::Invalidated { removed }) => removed,
            Ok(_) => 0,
            Err(err) => {
                tracing::warn!(tag, error = %err, "tag invalidation failed");
                0
            }
        }
    }

    pub async fn invalidate_user(&self, user_id: &str) -> u64 {
        self.invalidate_tag(&format!("user:{}", user_id)).await
    }

    pub async fn invalidate_role(&self, role: &str) -> bool {
        match self.kv.delete(&Self::role_key(role)).await {
            Ok(removed) => removed,
            Err(err) => {
                tracing::warn!(role, error = %err, "role invalidation failed");
                false
            }
        }
    }

    /// Drop every permission entry (roles, users, and tag sets).
    pub async fn invalidate_all(&self) -> u64 {
        let mut removed = 0u64;
        let Ok((_, keys)) = self.kv.scan(0, "perm:*", 500).await else {
            return 0;
        };
        for key in keys {
            if matches!(self.kv.delete(&key).await, Ok(true)) {
                removed += 1;
            }
        }
        removed
    }

    /// Bulk-seed role entries, e.g. at process start.
    pub async fn warm(&self, role_permissions: &[(String, HashSet<String>)]) -> usize {
        let mut warmed = 0;
        for (role, permissions) in role_permissions {
            self.set_role_permissions(role, permissions, None).await;
            warmed += 1;
        }
        tracing::info!(warmed, "permission cache warmed");
        warmed
    }

    async fn read(&self, key: &str) -> Option<HashSet<String>> {
        match self.kv.get(key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(err) => {
                // Store failure reads as a miss; the caller recomputes.
                tracing::warn!(key, error = %err, "permission cache read failed");
                None
            }
        }
    }

    async fn write(
        &self,
        key: &str,
        permissions: &HashSet<String>,
        ttl: Duration,
        tags: &[String],
    ) {
        let Ok(value) = serde_json::to_string(permissions) else {
            return;
        };
        if let Err(err) = self.kv.set_ex(key, &value, ttl).await {
            tracing::warn!(key, error = %err, "permission cache write failed");
            return;
        }
        for tag in tags {
            if let Err(err) = self.kv.sadd(&Self::tag_key(tag), key).await {
                tracing::warn!(key, tag, error = %err, "permission tag write failed");
            }
        }
    }
}
