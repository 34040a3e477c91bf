//! Resilience controller (§4.4)
//!
//! Holds a shared-store handle, registers the atomic scripts, caches config
//! reads locally behind a mutex with a TTL default of 300 s, and invalidates
//! that cache on a `config_updated` event — the same "local cache +
//! event-driven invalidation" shape `acton-service`'s middleware resilience
//! config used, generalized here to read from the shared store instead of
//! process-local defaults.

pub mod bulkhead;
pub mod circuit_breaker;
pub mod config;
pub mod rate_limiter;

pub use bulkhead::{Bulkhead, BulkheadStats};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerResult, GuardOutcome};
pub use config::{ConfigKind, ConfigOverride, OVERRIDES_HASH_KEY};
pub use rate_limiter::RateLimiter;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::ResilienceRuntimeConfig;
use crate::error::Result;
use crate::events::{EventBus, CONFIG_UPDATED_CHANNEL};
use crate::lock::DistributedLock;
use crate::store::StoreClient;

pub(crate) fn now_unix() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

struct CachedEntry {
    value: String,
    cached_at: Instant,
}

/// The controller's local read cache: `{kind}:{name} → raw JSON`, refreshed
/// on TTL expiry or on a `config_updated` event.
#[derive(Default)]
struct ConfigCache {
    entries: HashMap<String, CachedEntry>,
}

/// Central resilience composition: circuit breaker, rate limiter, bulkhead,
/// plus layered config/override reads and writes.
pub struct ResilienceController {
    store: StoreClient,
    events: EventBus,
    lock: DistributedLock,
    runtime: ResilienceRuntimeConfig,
    cache: Arc<Mutex<ConfigCache>>,
    pub circuit_breaker: CircuitBreaker,
    pub rate_limiter: RateLimiter,
    pub bulkhead: Bulkhead,
}

impl ResilienceController {
    pub fn new(store: StoreClient, events: EventBus, runtime: ResilienceRuntimeConfig) -> Self {
        let lock = DistributedLock::new(store.clone());
        let circuit_breaker = CircuitBreaker::new(store.clone(), events.clone());
        let rate_limiter = RateLimiter::new(store.clone());
        let bulkhead = Bulkhead::new(store.clone());
        Self {
            store,
            events,
            lock,
            runtime,
            cache: Arc::new(Mutex::new(ConfigCache::default())),
            circuit_breaker,
            rate_limiter,
            bulkhead,
        }
    }

    /// Subscribes to `resilience:config_updated` and drops the matching
    /// cache entry whenever one arrives.
    pub fn subscribe_invalidation(&self) -> crate::events::Subscription {
        let cache = self.cache.clone();
        self.events.subscribe(CONFIG_UPDATED_CHANNEL, move |event| {
            let cache = cache.clone();
            if let (Some(kind), Some(name)) = (
                event.payload.get("config_type").and_then(|v| v.as_str()),
                event.payload.get("config_name").and_then(|v| v.as_str()),
            ) {
                let field = format!("{kind}:{name}");
                tokio::spawn(async move {
                    cache.lock().await.entries.remove(&field);
                    debug!(field, "resilience config cache invalidated");
                });
            }
        })
    }

    /// Reads `name`'s config of `kind`: overrides hash first (if unexpired),
    /// then the main config hash, then the process default supplied by the
    /// caller.
    pub async fn get_config<T>(&self, kind: ConfigKind, name: &str, default: T) -> Result<T>
    where
        T: DeserializeOwned + Serialize + Clone,
    {
        let field = format!("{}:{name}", kind.hash_key());

        if let Some(cached) = self.cached(&field).await {
            if let Ok(value) = serde_json::from_str::<T>(&cached) {
                return Ok(value);
            }
        }

        if let Some(raw) = self.store.hget(OVERRIDES_HASH_KEY, &field).await? {
            if let Ok(over) = serde_json::from_str::<ConfigOverride<T>>(&raw) {
                if over.is_valid() {
                    self.remember(&field, &over.config).await?;
                    return Ok(over.config);
                }
            }
        }

        if let Some(raw) = self.store.hget(kind.hash_key(), name).await? {
            if let Ok(value) = serde_json::from_str::<T>(&raw) {
                self.remember(&field, &value).await?;
                return Ok(value);
            }
        }

        Ok(default)
    }

    /// Writes `name`'s config of `kind`. `use_override = true` (the manual
    /// operator path) writes to the overrides hash with the configured TTL;
    /// otherwise (the automated ML path) writes the main hash directly. Both
    /// paths publish `config_updated`.
    pub async fn set_config<T>(
        &self,
        kind: ConfigKind,
        name: &str,
        value: T,
        use_override: bool,
        source: &str,
    ) -> Result<()>
    where
        T: Serialize,
    {
        let lock_key = format!("resilience:{}:{name}", kind.hash_key());
        let mut handle = self
            .lock
            .acquire_or_err(&lock_key, Duration::from_secs(2))
            .await?;

        let field = format!("{}:{name}", kind.hash_key());
        if use_override {
            let over = ConfigOverride::new(value, self.runtime.override_ttl_s, source);
            let raw = serde_json::to_string(&over)?;
            self.store.hset(OVERRIDES_HASH_KEY, &field, &raw).await?;
        } else {
            let raw = serde_json::to_string(&value)?;
            self.store.hset(kind.hash_key(), name, &raw).await?;
        }

        self.cache.lock().await.entries.remove(&field);
        handle.release().await?;

        self.events
            .publish(
                CONFIG_UPDATED_CHANNEL,
                "config_updated",
                serde_json::json!({
                    "config_type": kind.hash_key(),
                    "config_name": name,
                    "timestamp": now_unix(),
                }),
            )
            .await?;

        Ok(())
    }

    /// Field names (`{kind}:{name}`) of currently unexpired manual
    /// overrides, irrespective of config type. Used by the ML optimizer to
    /// decide whether automatic tuning should be suppressed.
    pub async fn active_override_keys(&self) -> Result<Vec<String>> {
        #[derive(serde::Deserialize)]
        struct Expiry {
            expires_at: f64,
        }
        let now = now_unix();
        let all = self.store.hgetall(OVERRIDES_HASH_KEY).await?;
        Ok(all
            .into_iter()
            .filter_map(|(field, raw)| {
                let expiry: Expiry = serde_json::from_str(&raw).ok()?;
                (now < expiry.expires_at).then_some(field)
            })
            .collect())
    }

    async fn cached(&self, field: &str) -> Option<String> {
        let cache = self.cache.lock().await;
        let entry = cache.entries.get(field)?;
        if entry.cached_at.elapsed() < Duration::from_secs(self.runtime.config_cache_ttl_s) {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    async fn remember<T: Serialize>(&self, field: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.cache.lock().await.entries.insert(
            field.to_string(),
            CachedEntry {
                value: raw,
                cached_at: Instant::now(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_unix_is_monotonic_enough() {
        let a = now_unix();
        let b = now_unix();
        assert!(b >= a);
    }
}
