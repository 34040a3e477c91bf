//! Cluster-aware shared-store client
//!
//! On startup, attempts a cluster connection against the configured node
//! list; on failure, falls back to a single-node pool, mirroring
//! `acton-service/src/cache.rs`'s `create_pool_with_retries` backoff shape.
//! Command dispatch follows the direct `redis::cmd(...).query_async(...)`
//! idiom used throughout `acton-service/src/lockout/service.rs`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::AsyncCommands;
use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::error::{Error, Result};

/// Observed connectivity health, reported on every call rather than retried
/// internally (§4.1: "never panic the caller").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

enum Backend {
    Single(Pool),
    Cluster(ClusterConnection),
}

/// A thread-safe handle to the shared store. Cheap to clone; all variants
/// share the underlying pool/connection.
#[derive(Clone)]
pub struct StoreClient {
    backend: Arc<Backend>,
    healthy: Arc<AtomicBool>,
}

impl StoreClient {
    /// Connects using `cfg`, preferring the cluster topology when node URLs
    /// are configured, falling back to a single-node pool with retries.
    pub async fn connect(cfg: &StoreConfig) -> Result<Self> {
        if !cfg.cluster_urls.is_empty() {
            match Self::try_cluster(cfg).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    warn!(error = %e, "cluster connect failed, falling back to single node");
                }
            }
        }

        let pool = Self::create_pool_with_retries(cfg, 3).await?;
        Ok(StoreClient {
            backend: Arc::new(Backend::Single(pool)),
            healthy: Arc::new(AtomicBool::new(true)),
        })
    }

    async fn try_cluster(cfg: &StoreConfig) -> Result<Self> {
        let client = ClusterClient::new(cfg.cluster_urls.clone())
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        let conn = client
            .get_async_connection()
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        info!(nodes = cfg.cluster_urls.len(), "connected to store cluster");
        Ok(StoreClient {
            backend: Arc::new(Backend::Cluster(conn)),
            healthy: Arc::new(AtomicBool::new(true)),
        })
    }

    async fn create_pool_with_retries(cfg: &StoreConfig, max_retries: u32) -> Result<Pool> {
        let mut last_err = None;
        for attempt in 0..=max_retries {
            match Self::try_create_pool(cfg) {
                Ok(pool) => return Ok(pool),
                Err(e) => {
                    warn!(attempt, error = %e, "store pool creation failed, retrying");
                    last_err = Some(e);
                    let backoff = Duration::from_millis(100 * 2u64.pow(attempt));
                    tokio::time::sleep(backoff).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::StoreUnavailable("pool creation exhausted".into())))
    }

    fn try_create_pool(cfg: &StoreConfig) -> Result<Pool> {
        let pool_cfg = PoolConfig::from_url(cfg.url.clone());
        pool_cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::StoreUnavailable(e.to_string()))
    }

    /// Current health as observed by the last call or the background
    /// pinger; callers never block waiting for this to change.
    pub fn health(&self) -> HealthState {
        if self.healthy.load(Ordering::Relaxed) {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        }
    }

    async fn record<T>(&self, result: redis::RedisResult<T>) -> Result<T> {
        match result {
            Ok(v) => {
                self.healthy.store(true, Ordering::Relaxed);
                Ok(v)
            }
            Err(e) => {
                if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
                    self.healthy.store(false, Ordering::Relaxed);
                }
                Err(Error::from(e))
            }
        }
    }

    async fn with_single<F, Fut, T>(&self, pool: &Pool, f: F) -> Result<T>
    where
        F: FnOnce(deadpool_redis::Connection) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let conn = pool.get().await.map_err(|e| {
            self.healthy.store(false, Ordering::Relaxed);
            Error::from(e)
        })?;
        self.record(f(conn).await).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.get(key).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.get(key).await).await
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.set(key, value).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.set(key, value).await).await
            }
        }
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl_s: u64) -> Result<()> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move {
                    c.set_ex(key, value, ttl_s).await
                })
                .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.set_ex(key, value, ttl_s).await).await
            }
        }
    }

    pub async fn del(&self, key: &str) -> Result<u64> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.del(key).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.del(key).await).await
            }
        }
    }

    pub async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.incr(key, delta).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.incr(key, delta).await).await
            }
        }
    }

    pub async fn expire(&self, key: &str, ttl_s: i64) -> Result<bool> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.expire(key, ttl_s).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.expire(key, ttl_s).await).await
            }
        }
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.hget(key, field).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.hget(key, field).await).await
            }
        }
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.hset(key, field, value).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.hset(key, field, value).await).await
            }
        }
    }

    pub async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.hgetall(key).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.hgetall(key).await).await
            }
        }
    }

    pub async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move {
                    c.hincr(key, field, delta).await
                })
                .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.hincr(key, field, delta).await).await
            }
        }
    }

    pub async fn hdel(&self, key: &str, field: &str) -> Result<u64> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.hdel(key, field).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.hdel(key, field).await).await
            }
        }
    }

    pub async fn sadd(&self, key: &str, member: &str) -> Result<u64> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.sadd(key, member).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.sadd(key, member).await).await
            }
        }
    }

    pub async fn srem(&self, key: &str, member: &str) -> Result<u64> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.srem(key, member).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.srem(key, member).await).await
            }
        }
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.smembers(key).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.smembers(key).await).await
            }
        }
    }

    pub async fn scard(&self, key: &str) -> Result<u64> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.scard(key).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.scard(key).await).await
            }
        }
    }

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<u64> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.zadd(key, member, score).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.zadd(key, member, score).await).await
            }
        }
    }

    pub async fn zrem(&self, key: &str, member: &str) -> Result<u64> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.zrem(key, member).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.zrem(key, member).await).await
            }
        }
    }

    pub async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.zrange(key, start, stop).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.zrange(key, start, stop).await).await
            }
        }
    }

    pub async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move {
                    c.zrangebyscore(key, min, max).await
                })
                .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.zrangebyscore(key, min, max).await).await
            }
        }
    }

    pub async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move {
                    c.zrembyscore(key, min, max).await
                })
                .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.zrembyscore(key, min, max).await).await
            }
        }
    }

    pub async fn zcard(&self, key: &str) -> Result<u64> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.zcard(key).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.zcard(key).await).await
            }
        }
    }

    pub async fn lpush(&self, key: &str, value: &str) -> Result<u64> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.lpush(key, value).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.lpush(key, value).await).await
            }
        }
    }

    pub async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.lrange(key, start, stop).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.lrange(key, start, stop).await).await
            }
        }
    }

    pub async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.ltrim(key, start, stop).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.ltrim(key, start, stop).await).await
            }
        }
    }

    pub async fn publish(&self, channel: &str, message: &str) -> Result<u64> {
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { c.publish(channel, message).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(conn.publish(channel, message).await).await
            }
        }
    }

    /// Issues `PING` and reports whether the store answered.
    pub async fn ping(&self) -> HealthState {
        let result: Result<String> = match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move {
                    redis::cmd("PING").query_async(&mut c).await
                })
                .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(redis::cmd("PING").query_async(&mut conn).await)
                    .await
            }
        };
        if result.is_ok() {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        }
    }

    /// Runs a registered `redis::Script` against explicit keys and args,
    /// decoding the reply as `T` (a single value or a tuple, per the
    /// script's documented return shape).
    pub async fn eval_registered<T>(
        &self,
        script: &redis::Script,
        keys: &[&str],
        args: &[String],
    ) -> Result<T>
    where
        T: redis::FromRedisValue,
    {
        let mut invocation = script.prepare_invoke();
        for k in keys {
            invocation.key(*k);
        }
        for a in args {
            invocation.arg(a.as_str());
        }
        match self.backend.as_ref() {
            Backend::Single(pool) => {
                self.with_single(pool, |mut c| async move { invocation.invoke_async(&mut c).await })
                    .await
            }
            Backend::Cluster(conn) => {
                let mut conn = conn.clone();
                self.record(invocation.invoke_async(&mut conn).await).await
            }
        }
    }

    /// Cursor-based `SCAN MATCH pattern`, never `KEYS`, returned as a
    /// fully-materialized `Vec` (callers needing a lazy stream can page via
    /// repeated calls with `cursor`).
    pub async fn scan_match(&self, pattern: &str, batch: usize) -> Result<ScanMatch> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, chunk): (u64, Vec<String>) = match self.backend.as_ref() {
                Backend::Single(pool) => {
                    let conn = pool.get().await.map_err(Error::from)?;
                    let mut conn = conn;
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(batch)
                        .query_async(&mut conn)
                        .await
                        .map_err(Error::from)?
                }
                Backend::Cluster(conn) => {
                    let mut conn = conn.clone();
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(batch)
                        .query_async(&mut conn)
                        .await
                        .map_err(Error::from)?
                }
            };
            keys.extend(chunk);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        Ok(ScanMatch { keys })
    }
}

/// The materialized result of a `scan_match` sweep.
pub struct ScanMatch {
    keys: Vec<String>,
}

impl ScanMatch {
    pub fn into_keys(self) -> Vec<String> {
        self.keys
    }
}

impl IntoIterator for ScanMatch {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_create_pool_rejects_malformed_url() {
        let cfg = StoreConfig {
            url: "not-a-url".into(),
            ..StoreConfig::default()
        };
        assert!(StoreClient::try_create_pool(&cfg).is_err());
    }
}
