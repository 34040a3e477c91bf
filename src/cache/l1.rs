//! L1 in-process cache (§4.6.1)
//!
//! Per-strategy LRU segments, each with its own capacity/TTL, grounded on
//! `lru::LruCache` (the same crate `spineldb` uses for its own eviction).

use std::time::{Duration, Instant};

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use crate::config::CacheL1Config;
use crate::primitives::CacheStrategy;

#[derive(Debug, Clone)]
struct L1Entry {
    value: String,
    created_at: Instant,
}

struct Segment {
    cache: Mutex<LruCache<String, L1Entry>>,
    ttl: Duration,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
}

impl Segment {
    fn new(maxsize: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(maxsize.max(1)).unwrap();
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: std::sync::atomic::AtomicU64::new(0),
            misses: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        let mut cache = self.cache.lock().unwrap();
        if let Some(entry) = cache.get(key) {
            if entry.created_at.elapsed() <= self.ttl {
                self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            cache.pop(key);
        }
        self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        None
    }

    fn set(&self, key: String, value: String) {
        let mut cache = self.cache.lock().unwrap();
        cache.put(
            key,
            L1Entry {
                value,
                created_at: Instant::now(),
            },
        );
    }

    fn remove(&self, key: &str) {
        self.cache.lock().unwrap().pop(key);
    }

    /// Substring match sweep — sufficient because cache keys are hex
    /// fingerprints with known prefixes (§4.6.1).
    fn remove_pattern(&self, substring: &str) {
        let mut cache = self.cache.lock().unwrap();
        let matching: Vec<String> = cache
            .iter()
            .filter(|(k, _)| k.contains(substring))
            .map(|(k, _)| k.clone())
            .collect();
        for k in matching {
            cache.pop(&k);
        }
    }

    fn stats(&self) -> (u64, u64, usize) {
        (
            self.hits.load(std::sync::atomic::Ordering::Relaxed),
            self.misses.load(std::sync::atomic::Ordering::Relaxed),
            self.cache.lock().unwrap().len(),
        )
    }
}

/// The four segments named in §4.6.1 plus a general "simple boolean
/// permissions" segment used by the hybrid read path's fast lane.
pub struct L1Cache {
    user_permissions: Segment,
    role_permissions: Segment,
    inheritance_tree: Segment,
    conditional_permissions: Segment,
    simple: Segment,
}

impl L1Cache {
    pub fn new(cfg: &CacheL1Config) -> Self {
        Self {
            user_permissions: Segment::new(cfg.basic_maxsize, Duration::from_secs(cfg.basic_ttl_s)),
            role_permissions: Segment::new(cfg.role_maxsize, Duration::from_secs(cfg.role_ttl_s)),
            inheritance_tree: Segment::new(
                cfg.inheritance_maxsize,
                Duration::from_secs(cfg.inheritance_ttl_s),
            ),
            conditional_permissions: Segment::new(
                cfg.inheritance_maxsize,
                Duration::from_secs(cfg.inheritance_ttl_s),
            ),
            simple: Segment::new(cfg.basic_maxsize, Duration::from_secs(cfg.active_ttl_s)),
        }
    }

    fn segment(&self, strategy: CacheStrategy) -> &Segment {
        match strategy {
            CacheStrategy::UserPermissions => &self.user_permissions,
            CacheStrategy::RolePermissions => &self.role_permissions,
            CacheStrategy::InheritanceTree => &self.inheritance_tree,
            CacheStrategy::ConditionalPermissions => &self.conditional_permissions,
        }
    }

    pub fn get(&self, key: &str, strategy: CacheStrategy) -> Option<String> {
        self.segment(strategy).get(key)
    }

    pub fn set(&self, key: &str, value: &str, strategy: CacheStrategy) {
        self.segment(strategy).set(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str, strategy: CacheStrategy) {
        self.segment(strategy).remove(key);
    }

    pub fn remove_pattern(&self, substring: &str, strategy: CacheStrategy) {
        self.segment(strategy).remove_pattern(substring);
    }

    pub fn get_simple(&self, key: &str) -> Option<bool> {
        self.simple.get(key).map(|v| v == "1")
    }

    pub fn set_simple(&self, key: &str, value: bool) {
        self.simple.set(key.to_string(), if value { "1" } else { "0" }.to_string());
    }

    pub fn remove_simple(&self, key: &str) {
        self.simple.remove(key);
    }

    pub fn remove_simple_pattern(&self, substring: &str) {
        self.simple.remove_pattern(substring);
    }

    /// `(hits, misses, size)` per segment, in declaration order, for
    /// diagnostics/metrics.
    pub fn segment_stats(&self) -> Vec<(&'static str, u64, u64, usize)> {
        let (h, m, s) = self.user_permissions.stats();
        let mut out = vec![("user_permissions", h, m, s)];
        let (h, m, s) = self.role_permissions.stats();
        out.push(("role_permissions", h, m, s));
        let (h, m, s) = self.inheritance_tree.stats();
        out.push(("inheritance_tree", h, m, s));
        let (h, m, s) = self.conditional_permissions.stats();
        out.push(("conditional_permissions", h, m, s));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_expiry_evicts() {
        let cfg = CacheL1Config {
            basic_ttl_s: 0,
            ..CacheL1Config::default()
        };
        let cache = L1Cache::new(&cfg);
        cache.set("k", "v", CacheStrategy::UserPermissions);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k", CacheStrategy::UserPermissions), None);
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let cfg = CacheL1Config {
            basic_maxsize: 1,
            ..CacheL1Config::default()
        };
        let cache = L1Cache::new(&cfg);
        cache.set("a", "1", CacheStrategy::UserPermissions);
        cache.set("b", "2", CacheStrategy::UserPermissions);
        assert_eq!(cache.get("a", CacheStrategy::UserPermissions), None);
        assert_eq!(cache.get("b", CacheStrategy::UserPermissions), Some("2".to_string()));
    }

    #[test]
    fn remove_pattern_sweeps_matching_keys() {
        let cfg = CacheL1Config::default();
        let cache = L1Cache::new(&cfg);
        cache.set("basic_perm:{u1}:read", "1", CacheStrategy::UserPermissions);
        cache.set("basic_perm:{u2}:read", "1", CacheStrategy::UserPermissions);
        cache.remove_pattern("{u1}", CacheStrategy::UserPermissions);
        assert_eq!(
            cache.get("basic_perm:{u1}:read", CacheStrategy::UserPermissions),
            None
        );
        assert!(cache
            .get("basic_perm:{u2}:read", CacheStrategy::UserPermissions)
            .is_some());
    }
}
