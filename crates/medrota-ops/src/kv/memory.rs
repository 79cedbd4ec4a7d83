//! In-process key-value store.
//!
//! Backs the operational components in single-node deployments and in
//! tests. One mutex over the whole keyspace makes every [`AtomicOp`]
//! trivially atomic, the same guarantee a networked store provides through
//! server-side scripts.

use crate::error::OpsError;
use crate::kv::{AtomicOp, AtomicOutcome, DeniedBy, KvStore, RateLimitRaw};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    ZSet(BTreeMap<String, f64>),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::ZSet(_) => "zset",
            Value::Set(_) => "set",
            Value::Hash(_) => "hash",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
    member_seq: AtomicU64,
    /// Fault injection: when set, every operation fails as unavailable.
    unavailable: AtomicBool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage (fault injection for resilience tests).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<(), OpsError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(OpsError::StoreUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str) {
        let now = Instant::now();
        if entries.get(key).map_or(false, |e| e.is_expired(now)) {
            entries.remove(key);
        }
    }
}

fn glob_match(pattern: &str, key: &str) -> bool {
    // Only `*` wildcards, which is all the callers use.
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(pos) => {
                if i == 0 && pos != 0 {
                    return false;
                }
                rest = &rest[pos + part.len()..];
            }
            None => return false,
        }
    }
    parts.last().map_or(true, |last| {
        last.is_empty() || key.ends_with(last)
    })
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, OpsError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(entry) => Err(OpsError::WrongKind {
                key: key.to_string(),
                found: entry.value.kind(),
            }),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), OpsError> {
        self.check_available()?;
        self.entries
            .lock()
            .insert(key.to_string(), Entry::live(Value::Str(value.to_string())));
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), OpsError> {
        self.check_available()?;
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, OpsError> {
        self.check_available()?;
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, OpsError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::live(Value::Str("0".to_string())));
        match &mut entry.value {
            Value::Str(s) => {
                let current: i64 = s.parse().unwrap_or(0);
                let next = current + delta;
                *s = next.to_string();
                Ok(next)
            }
            other => Err(OpsError::WrongKind {
                key: key.to_string(),
                found: other.kind(),
            }),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, OpsError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), OpsError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::live(Value::ZSet(BTreeMap::new())));
        match &mut entry.value {
            Value::ZSet(zset) => {
                zset.insert(member.to_string(), score);
                Ok(())
            }
            other => Err(OpsError::WrongKind {
                key: key.to_string(),
                found: other.kind(),
            }),
        }
    }

    async fn zrem_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<u64, OpsError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        match entries.get_mut(key) {
            Some(Entry {
                value: Value::ZSet(zset),
                ..
            }) => {
                let before = zset.len();
                zset.retain(|_, &mut score| score < min || score > max);
                Ok((before - zset.len()) as u64)
            }
            Some(entry) => Err(OpsError::WrongKind {
                key: key.to_string(),
                found: entry.value.kind(),
            }),
            None => Ok(0),
        }
    }

    async fn zcard(&self, key: &str) -> Result<u64, OpsError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        match entries.get(key) {
            Some(Entry {
                value: Value::ZSet(zset),
                ..
            }) => Ok(zset.len() as u64),
            Some(entry) => Err(OpsError::WrongKind {
                key: key.to_string(),
                found: entry.value.kind(),
            }),
            None => Ok(0),
        }
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, OpsError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        match entries.get(key) {
            Some(Entry {
                value: Value::ZSet(zset),
                ..
            }) => {
                let mut members: Vec<(&String, &f64)> = zset.iter().collect();
                members.sort_by(|a, b| {
                    a.1.partial_cmp(b.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(b.0))
                });
                let len = members.len() as i64;
                let norm = |idx: i64| -> i64 {
                    if idx < 0 {
                        (len + idx).max(0)
                    } else {
                        idx.min(len)
                    }
                };
                let lo = norm(start);
                let hi = (norm(stop) + 1).min(len);
                if lo >= hi {
                    return Ok(Vec::new());
                }
                Ok(members[lo as usize..hi as usize]
                    .iter()
                    .map(|(m, _)| (*m).clone())
                    .collect())
            }
            Some(entry) => Err(OpsError::WrongKind {
                key: key.to_string(),
                found: entry.value.kind(),
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, OpsError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::live(Value::Set(HashSet::new())));
        match &mut entry.value {
            Value::Set(set) => Ok(set.insert(member.to_string())),
            other => Err(OpsError::WrongKind {
                key: key.to_string(),
                found: other.kind(),
            }),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, OpsError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        match entries.get(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(entry) => Err(OpsError::WrongKind {
                key: key.to_string(),
                found: entry.value.kind(),
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, OpsError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        match entries.get_mut(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.remove(member)),
            Some(entry) => Err(OpsError::WrongKind {
                key: key.to_string(),
                found: entry.value.kind(),
            }),
            None => Ok(false),
        }
    }

    async fn hset_all(
        &self,
        key: &str,
        fields: HashMap<String, String>,
    ) -> Result<(), OpsError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::live(Value::Hash(HashMap::new())));
        match &mut entry.value {
            Value::Hash(hash) => {
                hash.extend(fields);
                Ok(())
            }
            other => Err(OpsError::WrongKind {
                key: key.to_string(),
                found: other.kind(),
            }),
        }
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, OpsError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        match entries.get(key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(entry) => Err(OpsError::WrongKind {
                key: key.to_string(),
                found: entry.value.kind(),
            }),
            None => Ok(HashMap::new()),
        }
    }

    async fn hmget(
        &self,
        key: &str,
        fields: &[&str],
    ) -> Result<Vec<Option<String>>, OpsError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        match entries.get(key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(fields.iter().map(|f| hash.get(*f).cloned()).collect()),
            Some(entry) => Err(OpsError::WrongKind {
                key: key.to_string(),
                found: entry.value.kind(),
            }),
            None => Ok(vec![None; fields.len()]),
        }
    }

    async fn scan(
        &self,
        _cursor: u64,
        pattern: &str,
        _count: u64,
    ) -> Result<(u64, Vec<String>), OpsError> {
        self.check_available()?;
        let now = Instant::now();
        let entries = self.entries.lock();
        let keys = entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .filter(|(k, _)| glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        // The whole keyspace fits one pass in-process.
        Ok((0, keys))
    }

    async fn eval(&self, op: AtomicOp) -> Result<AtomicOutcome, OpsError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        match op {
            AtomicOp::RateLimitCheck {
                bucket_key,
                minute_key,
                hour_key,
                capacity,
                refill_rate,
                per_minute,
                per_hour,
                now_ms,
                state_ttl,
            } => {
                // Refill the bucket from its stored state.
                Self::purge_expired(&mut entries, &bucket_key);
                let (mut tokens, last_refill_ms) = match entries.get(&bucket_key) {
                    Some(Entry {
                        value: Value::Hash(hash),
                        ..
                    }) => {
                        let tokens = hash
                            .get("tokens")
                            .and_then(|s| s.parse::<f64>().ok())
                            .unwrap_or(capacity);
                        let last = hash
                            .get("last_refill")
                            .and_then(|s| s.parse::<i64>().ok())
                            .unwrap_or(now_ms);
                        (tokens, last)
                    }
                    _ => (capacity, now_ms),
                };
                let elapsed_s = ((now_ms - last_refill_ms).max(0)) as f64 / 1000.0;
                tokens = (tokens + elapsed_s * refill_rate).min(capacity);

                // Prune both windows before counting.
                for key in [&minute_key, &hour_key] {
                    Self::purge_expired(&mut entries, key);
                }
                let window_count = |entries: &HashMap<String, Entry>,
                                    key: &str,
                                    window_ms: i64|
                 -> (u64, i64) {
                    match entries.get(key) {
                        Some(Entry {
                            value: Value::ZSet(zset),
                            ..
                        }) => {
                            let floor = (now_ms - window_ms) as f64;
                            let live: Vec<f64> = zset
                                .values()
                                .copied()
                                .filter(|&score| score > floor)
                                .collect();
                            let oldest = live
                                .iter()
                                .copied()
                                .fold(f64::INFINITY, f64::min);
                            let reset = if live.is_empty() {
                                now_ms
                            } else {
                                oldest as i64 + window_ms
                            };
                            (live.len() as u64, reset)
                        }
                        _ => (0, now_ms),
                    }
                };

                let (minute_count, minute_reset_ms) = window_count(&entries, &minute_key, 60_000);
                let (hour_count, hour_reset_ms) = window_count(&entries, &hour_key, 3_600_000);

                let denied_by = if tokens < 1.0 {
                    Some(DeniedBy::Burst)
                } else if minute_count >= per_minute {
                    Some(DeniedBy::MinuteWindow)
                } else if hour_count >= per_hour {
                    Some(DeniedBy::HourWindow)
                } else {
                    None
                };

                let allowed = denied_by.is_none();
                let (minute_count, hour_count) = if allowed {
                    // Consume the token and record the request in both
                    // windows; a denial consumes nothing.
                    tokens -= 1.0;
                    let member = format!(
                        "{}-{}",
                        now_ms,
                        self.member_seq.fetch_add(1, Ordering::Relaxed)
                    );
                    for (key, window_ms) in
                        [(&minute_key, 60_000i64), (&hour_key, 3_600_000i64)]
                    {
                        let entry = entries
                            .entry(key.clone())
                            .or_insert_with(|| Entry::live(Value::ZSet(BTreeMap::new())));
                        if let Value::ZSet(zset) = &mut entry.value {
                            let floor = (now_ms - window_ms) as f64;
                            zset.retain(|_, &mut score| score > floor);
                            zset.insert(member.clone(), now_ms as f64);
                        }
                        entry.expires_at =
                            Some(Instant::now() + Duration::from_millis(window_ms as u64));
                    }
                    (minute_count + 1, hour_count + 1)
                } else {
                    (minute_count, hour_count)
                };

                // Persist refreshed bucket state either way.
                let mut hash = HashMap::new();
                hash.insert("tokens".to_string(), tokens.to_string());
                hash.insert("last_refill".to_string(), now_ms.to_string());
                entries.insert(
                    bucket_key,
                    Entry {
                        value: Value::Hash(hash),
                        expires_at: Some(Instant::now() + state_ttl),
                    },
                );

                Ok(AtomicOutcome::RateLimit(RateLimitRaw {
                    allowed,
                    denied_by,
                    tokens_remaining: tokens,
                    minute_count,
                    hour_count,
                    minute_reset_ms,
                    hour_reset_ms,
                }))
            }
            AtomicOp::TagInvalidate { tag_key } => {
                Self::purge_expired(&mut entries, &tag_key);
                let members: Vec<String> = match entries.get(&tag_key) {
                    Some(Entry {
                        value: Value::Set(set),
                        ..
                    }) => set.iter().cloned().collect(),
                    _ => Vec::new(),
                };
                let mut removed = 0u64;
                for member in &members {
                    if entries.remove(member).is_some() {
                        removed += 1;
                    }
                }
                entries.remove(&tag_key);
                Ok(AtomicOutcome::Invalidated { removed })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_ex_expires() {
        let kv = MemoryKv::new();
        kv.set_ex("k", "v", Duration::from_millis(10)).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some("v".to_string()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incr_by_starts_from_zero() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr_by("counter", 3).await.unwrap(), 3);
        assert_eq!(kv.incr_by("counter", -1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_zset_prune_and_count() {
        let kv = MemoryKv::new();
        kv.zadd("w", "a", 100.0).await.unwrap();
        kv.zadd("w", "b", 200.0).await.unwrap();
        kv.zadd("w", "c", 300.0).await.unwrap();
        assert_eq!(kv.zcard("w").await.unwrap(), 3);
        assert_eq!(kv.zrem_range_by_score("w", 0.0, 150.0).await.unwrap(), 1);
        assert_eq!(kv.zrange("w", 0, -1).await.unwrap(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_wrong_kind_is_an_error() {
        let kv = MemoryKv::new();
        kv.set("k", "v").await.unwrap();
        assert!(kv.zadd("k", "m", 1.0).await.is_err());
    }

    #[tokio::test]
    async fn test_hash_fields_positional_lookup() {
        let kv = MemoryKv::new();
        let mut fields = HashMap::new();
        fields.insert("tokens".to_string(), "4.5".to_string());
        fields.insert("last_refill".to_string(), "1000".to_string());
        kv.hset_all("bucket", fields).await.unwrap();

        let values = kv
            .hmget("bucket", &["tokens", "missing", "last_refill"])
            .await
            .unwrap();
        assert_eq!(
            values,
            vec![Some("4.5".to_string()), None, Some("1000".to_string())]
        );
        assert_eq!(kv.hget_all("bucket").await.unwrap().len(), 2);
        assert_eq!(kv.hmget("ghost", &["a"]).await.unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_op() {
        let kv = MemoryKv::new();
        kv.set_unavailable(true);
        assert!(matches!(
            kv.get("k").await,
            Err(OpsError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_scan_glob_matching() {
        let kv = MemoryKv::new();
        kv.set("perm:role:admin", "1").await.unwrap();
        kv.set("perm:user:42", "1").await.unwrap();
        kv.set("other", "1").await.unwrap();
        let (cursor, mut keys) = kv.scan(0, "perm:*", 100).await.unwrap();
        keys.sort();
        assert_eq!(cursor, 0);
        assert_eq!(keys, vec!["perm:role:admin", "perm:user:42"]);
    }

    #[test]
    fn test_glob_match_edges() {
        assert!(glob_match("a*", "abc"));
        assert!(glob_match("*c", "abc"));
        assert!(glob_match("a*c", "abc"));
        assert!(glob_match("*", "anything"));
        assert!(!glob_match("a*d", "abc"));
        assert!(glob_match("abc", "abc"));
        assert!(!glob_match("abc", "abd"));
    }

    #[tokio::test]
    async fn test_tag_invalidate_removes_members_and_tag() {
        let kv = MemoryKv::new();
        kv.set("perm:user:1", "x").await.unwrap();
        kv.set("perm:user:2", "y").await.unwrap();
        kv.sadd("tag:user:1", "perm:user:1").await.unwrap();
        kv.sadd("tag:user:1", "perm:user:2").await.unwrap();

        let outcome = kv
            .eval(AtomicOp::TagInvalidate {
                tag_key: "tag:user:1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, AtomicOutcome::Invalidated { removed: 2 });
        assert_eq!(kv.get("perm:user:1").await.unwrap(), None);
        assert!(kv.smembers("tag:user:1").await.unwrap().is_empty());
    }
}
