//! Resilience config + override layering (§4.4, §3's `resilience:{...}` hashes)

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::{BulkheadConfig, CircuitBreakerConfig, RateLimitConfig};

/// One of the config kinds stored under `resilience:{kind}` / overridden
/// under `resilience:{config_overrides}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKind {
    CircuitBreaker,
    RateLimit,
    Bulkhead,
    Degradation,
    GlobalSwitch,
}

impl ConfigKind {
    pub fn hash_key(&self) -> &'static str {
        match self {
            ConfigKind::CircuitBreaker => "resilience:{circuit_breaker}",
            ConfigKind::RateLimit => "resilience:{rate_limit}",
            ConfigKind::Bulkhead => "resilience:{bulkhead}",
            ConfigKind::Degradation => "resilience:{degradation}",
            ConfigKind::GlobalSwitch => "resilience:{global_switch}",
        }
    }
}

pub const OVERRIDES_HASH_KEY: &str = "resilience:{config_overrides}";

/// An entry in the overrides hash: `{config, created_at, expires_at, source}`
/// keyed by `{kind}:{name}`. Shadows main config until `expires_at` passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOverride<T> {
    pub config: T,
    pub created_at: f64,
    pub expires_at: f64,
    pub source: String,
}

impl<T> ConfigOverride<T> {
    pub fn new(config: T, ttl_s: u64, source: impl Into<String>) -> Self {
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        Self {
            config,
            created_at: now,
            expires_at: now + ttl_s as f64,
            source: source.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        now < self.expires_at
    }
}

/// Per-name resilience config, resolved override-then-main-then-default
/// (§3 invariant 3: override wins while valid, otherwise main, otherwise
/// default).
#[derive(Debug, Clone)]
pub enum ResolvedConfig {
    CircuitBreaker(CircuitBreakerConfig),
    RateLimit(RateLimitConfig),
    Bulkhead(BulkheadConfig),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_expiry() {
        let over = ConfigOverride::new(CircuitBreakerConfig::default(), 0, "test");
        // ttl of 0 means expires_at == created_at == now; by the time
        // is_valid() runs, `now` has advanced past it.
        assert!(!over.is_valid());
    }
}
