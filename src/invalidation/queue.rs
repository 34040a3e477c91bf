//! Delayed invalidation queue (§4.7.1, §3, §B.1)
//!
//! Grounded directly on `original_source/.../permission_invalidation.py`:
//! the scored ZSET queue, the four reverse-index prefixes, and the
//! aggregate stats hash it maintains alongside them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::store::StoreClient;

pub const QUEUE_KEY: &str = "delayed_invalidation_queue";
pub const STATS_KEY: &str = "invalidation_stats";
pub(crate) const REASON_INDEX_PREFIX: &str = "reason_index:";
pub(crate) const USER_INDEX_PREFIX: &str = "user_index:";
const SERVER_INDEX_PREFIX: &str = "server_index:";
pub(crate) const PATTERN_INDEX_PREFIX: &str = "pattern_index:";
const REVERSE_INDEX_TTL_S: i64 = 86_400;
const STATS_TTL_S: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLevel {
    L1,
    L2,
    Both,
}

/// A queued invalidation task, serialized as the ZSET member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationTask {
    pub cache_key: String,
    pub cache_level: CacheLevel,
    pub reason: String,
    pub timestamp: f64,
    pub processed: bool,
}

pub struct DelayedInvalidationQueue {
    store: StoreClient,
}

impl DelayedInvalidationQueue {
    pub fn new(store: StoreClient) -> Self {
        Self { store }
    }

    /// Pushes a task scored by enqueue time, updates every applicable
    /// reverse index, and bumps the per-minute in-rate statistic (§4.7.1).
    pub async fn add_delayed(
        &self,
        cache_key: &str,
        cache_level: CacheLevel,
        reason: &str,
    ) -> Result<()> {
        let now = now_unix();
        let task = InvalidationTask {
            cache_key: cache_key.to_string(),
            cache_level,
            reason: reason.to_string(),
            timestamp: now,
            processed: false,
        };
        let member = serde_json::to_string(&task)?;
        self.store.zadd(QUEUE_KEY, &member, now).await?;

        self.update_reverse_indexes(cache_key, reason).await?;
        self.update_stats("delayed_invalidations", 1).await?;
        self.record_rate_stats("in", 1).await?;

        debug!(cache_key, reason, "task enqueued for delayed invalidation");
        Ok(())
    }

    async fn update_reverse_indexes(&self, cache_key: &str, reason: &str) -> Result<()> {
        self.store
            .sadd(&format!("{REASON_INDEX_PREFIX}{reason}"), cache_key)
            .await?;
        self.store
            .expire(&format!("{REASON_INDEX_PREFIX}{reason}"), REVERSE_INDEX_TTL_S)
            .await?;

        if let Some(user_id) = parse_user_id(cache_key) {
            let key = format!("{USER_INDEX_PREFIX}{user_id}");
            self.store.sadd(&key, cache_key).await?;
            self.store.expire(&key, REVERSE_INDEX_TTL_S).await?;
        }
        if let Some(server_id) = parse_server_id(cache_key) {
            let key = format!("{SERVER_INDEX_PREFIX}{server_id}");
            self.store.sadd(&key, cache_key).await?;
            self.store.expire(&key, REVERSE_INDEX_TTL_S).await?;
        }

        let pattern = key_pattern(cache_key);
        let key = format!("{PATTERN_INDEX_PREFIX}{pattern}");
        self.store.sadd(&key, cache_key).await?;
        self.store.expire(&key, REVERSE_INDEX_TTL_S).await?;

        Ok(())
    }

    async fn update_stats(&self, field: &str, delta: i64) -> Result<()> {
        self.store.hincr(STATS_KEY, field, delta).await?;
        self.store.hincr(STATS_KEY, "total_invalidations", delta).await?;
        self.store.expire(STATS_KEY, STATS_TTL_S).await?;
        Ok(())
    }

    async fn record_rate_stats(&self, direction: &str, delta: i64) -> Result<()> {
        let minute = minute_bucket();
        let key = format!("{direction}_rate:{minute}");
        self.store.hincr(&key, "count", delta).await?;
        self.store.hset(&key, "timestamp", &now_unix().to_string()).await?;
        self.store.expire(&key, 3600).await?;
        Ok(())
    }

    /// Bumps the out-rate bucket and the applicable completed-invalidation
    /// stats field; called by the executor once a batch is applied.
    pub async fn record_processed(&self, field: &str, count: i64) -> Result<()> {
        self.update_stats(field, count).await?;
        self.record_rate_stats("out", count).await
    }

    pub async fn pending_count(&self) -> Result<u64> {
        self.store.zcard(QUEUE_KEY).await
    }

    /// §B.1: `{pending_count, processed_count, total_count, stats}`.
    pub async fn stats_snapshot(&self) -> Result<InvalidationStats> {
        let pending = self.pending_count().await?;
        let fields = self.store.hgetall(STATS_KEY).await.unwrap_or_default();
        let mut stats = std::collections::HashMap::new();
        let mut processed = 0i64;
        let mut total = 0i64;
        for (k, v) in fields {
            let parsed: i64 = v.parse().unwrap_or(0);
            if k == "total_invalidations" {
                total = parsed;
            }
            if k == "immediate_invalidations" || k == "batch_invalidations" {
                processed += parsed;
            }
            stats.insert(k, parsed);
        }
        Ok(InvalidationStats {
            pending_count: pending,
            processed_count: processed.max(0) as u64,
            total_count: total.max(0) as u64,
            stats,
        })
    }

    pub async fn oldest(&self, limit: usize) -> Result<Vec<InvalidationTask>> {
        let raw = self.store.zrange(QUEUE_KEY, 0, limit as isize - 1).await?;
        Ok(raw
            .into_iter()
            .filter_map(|m| serde_json::from_str::<InvalidationTask>(&m).ok())
            .collect())
    }

    pub async fn cleanup_older_than(&self, max_age_s: i64) -> Result<u64> {
        let cutoff = now_unix() - max_age_s as f64;
        self.store.zremrangebyscore(QUEUE_KEY, f64::NEG_INFINITY, cutoff).await
    }
}

#[derive(Debug, Clone)]
pub struct InvalidationStats {
    pub pending_count: u64,
    pub processed_count: u64,
    pub total_count: u64,
    pub stats: std::collections::HashMap<String, i64>,
}

fn now_unix() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

fn minute_bucket() -> String {
    Utc::now().format("%Y%m%d%H%M").to_string()
}

/// Extracts the hash-tag group (`{...}`) from a cache key, e.g.
/// `basic_perm:{u1}:read` → `u1`. The opaque `perm:{<md5hex>}` fingerprint
/// family deliberately erases the user mapping — those keys are grouped by
/// pattern/reason only; user-level invalidation for them goes through the
/// `user_index:{u}` reverse index (§4.6.5), not this inference.
fn hash_tag(cache_key: &str) -> Option<&str> {
    let start = cache_key.find('{')? + 1;
    let end = cache_key[start..].find('}')? + start;
    Some(&cache_key[start..end])
}

pub(crate) fn parse_user_id(cache_key: &str) -> Option<String> {
    if cache_key.starts_with("perm:{") {
        return None;
    }
    if cache_key.starts_with("basic_perm:")
        || cache_key.starts_with("user_active:")
        || cache_key.starts_with("user_role:")
        || cache_key.starts_with("inheritance:")
    {
        return hash_tag(cache_key).map(str::to_string);
    }
    None
}

fn parse_server_id(_cache_key: &str) -> Option<String> {
    // No cache key family in §3's grammar carries a server id directly;
    // server-scoped invalidation is driven by the role→users expansion in
    // §4.6.5 rather than by parsing it out of a cache key.
    None
}

fn key_pattern(cache_key: &str) -> String {
    cache_key.split(':').next().unwrap_or(cache_key).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_user_id_from_basic_perm_key() {
        assert_eq!(parse_user_id("basic_perm:{u1}:read"), Some("u1".to_string()));
    }

    #[test]
    fn opaque_fingerprint_key_has_no_inferred_user() {
        assert_eq!(parse_user_id("perm:{deadbeef}"), None);
    }

    #[test]
    fn key_pattern_is_prefix() {
        assert_eq!(key_pattern("basic_perm:{u1}:read"), "basic_perm");
    }
}
