//! Layered configuration
//!
//! Mirrors `acton-service::config::Config::load_for_service`'s figment stack:
//! built-in defaults, then `./config.toml`, then an XDG user config dir, then
//! `/etc/<service>/<name>/config.toml`, then `PERMIX_`-prefixed environment
//! variables as the highest-priority layer.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheL1Config {
    pub basic_maxsize: usize,
    pub role_maxsize: usize,
    pub inheritance_maxsize: usize,
    pub basic_ttl_s: u64,
    pub role_ttl_s: u64,
    pub inheritance_ttl_s: u64,
    pub active_ttl_s: u64,
}

impl Default for CacheL1Config {
    fn default() -> Self {
        Self {
            basic_maxsize: 5000,
            role_maxsize: 3000,
            inheritance_maxsize: 2000,
            basic_ttl_s: 900,
            role_ttl_s: 1200,
            inheritance_ttl_s: 2400,
            active_ttl_s: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub l1: CacheL1Config,
    pub l2_ttl_s: u64,
    pub read_lock_timeout_s: f64,
    pub warm_up_entries: Vec<crate::primitives::WarmUpEntry>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1: CacheL1Config::default(),
            l2_ttl_s: 600,
            read_lock_timeout_s: 1.0,
            warm_up_entries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayedInvalidationConfig {
    pub batch_size: u32,
    pub min_queue_size: u32,
    pub processor_interval_ms: u64,
}

impl Default for DelayedInvalidationConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            min_queue_size: 50,
            processor_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_s: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_s: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub time_window_s: u64,
    pub tokens_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            time_window_s: 60,
            tokens_per_second: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadConfig {
    pub max_concurrent_calls: u32,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MlConfig {
    pub auto_apply_threshold: f64,
    pub history_window: usize,
    pub prediction_horizon: usize,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            auto_apply_threshold: 0.95,
            history_window: 1000,
            prediction_horizon: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceRuntimeConfig {
    pub config_cache_ttl_s: u64,
    pub override_ttl_s: u64,
}

impl Default for ResilienceRuntimeConfig {
    fn default() -> Self {
        Self {
            config_cache_ttl_s: 300,
            override_ttl_s: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub interval_s: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { interval_s: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub cluster_urls: Vec<String>,
    pub pool_max_size: usize,
    pub connect_timeout_s: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".into(),
            cluster_urls: Vec::new(),
            pool_max_size: 16,
            connect_timeout_s: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_s: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/permix".into(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_s: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AbacConfig {
    pub enabled: bool,
    pub base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for AbacConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://127.0.0.1:8181".into(),
            request_timeout_ms: 250,
        }
    }
}

/// Root configuration, matching the parameter table in spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service_name: String,
    pub maintenance_mode: bool,
    pub store: StoreConfig,
    pub database: DatabaseConfig,
    pub abac: AbacConfig,
    pub cache: CacheConfig,
    pub delayed: DelayedInvalidationConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub bulkhead: BulkheadConfig,
    pub ml: MlConfig,
    pub resilience: ResilienceRuntimeConfig,
    pub aggregator: AggregatorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "permix".into(),
            maintenance_mode: false,
            store: StoreConfig::default(),
            database: DatabaseConfig::default(),
            abac: AbacConfig::default(),
            cache: CacheConfig::default(),
            delayed: DelayedInvalidationConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            bulkhead: BulkheadConfig::default(),
            ml: MlConfig::default(),
            resilience: ResilienceRuntimeConfig::default(),
            aggregator: AggregatorConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration for the named service using the standard search
    /// path: defaults, `./config.toml`, XDG config dir, `/etc`, env.
    pub fn load_for_service(name: &str) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config {
            service_name: name.to_string(),
            ..Config::default()
        }));

        let cwd_path = PathBuf::from("./config.toml");
        if cwd_path.exists() {
            figment = figment.merge(Toml::file(&cwd_path));
        }

        if let Some(xdg_path) = Self::xdg_config_path(name) {
            if xdg_path.exists() {
                figment = figment.merge(Toml::file(&xdg_path));
            }
        }

        let etc_path = PathBuf::from(format!("/etc/{name}/config.toml"));
        if etc_path.exists() {
            figment = figment.merge(Toml::file(&etc_path));
        }

        figment = figment.merge(Env::prefixed("PERMIX_").split("_"));

        figment.extract().map_err(Error::from)
    }

    /// Loads configuration from an explicit file path, still applying the
    /// defaults-then-env layers around it.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PERMIX_").split("_"));
        figment.extract().map_err(Error::from)
    }

    fn xdg_config_path(name: &str) -> Option<PathBuf> {
        let dirs = xdg::BaseDirectories::with_prefix(name).ok()?;
        Some(dirs.get_config_home().join("config.toml"))
    }

    /// Validates cross-field invariants that serde defaults can't express.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.tokens_per_second == 0 {
            return Err(Error::ConfigInvalid(
                "rate_limit.tokens_per_second must be > 0".into(),
            ));
        }
        if self.bulkhead.max_concurrent_calls == 0 {
            return Err(Error::ConfigInvalid(
                "bulkhead.max_concurrent_calls must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ml.auto_apply_threshold) {
            return Err(Error::ConfigInvalid(
                "ml.auto_apply_threshold must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = Config::default();
        assert_eq!(cfg.cache.l1.basic_maxsize, 5000);
        assert_eq!(cfg.cache.l2_ttl_s, 600);
        assert_eq!(cfg.delayed.batch_size, 100);
        assert_eq!(cfg.delayed.min_queue_size, 50);
        assert_eq!(cfg.circuit_breaker.failure_threshold, 5);
        assert_eq!(cfg.circuit_breaker.recovery_timeout_s, 60);
        assert_eq!(cfg.rate_limit.max_requests, 100);
        assert_eq!(cfg.rate_limit.time_window_s, 60);
        assert_eq!(cfg.rate_limit.tokens_per_second, 10);
        assert_eq!(cfg.bulkhead.max_concurrent_calls, 10);
        assert!((cfg.ml.auto_apply_threshold - 0.95).abs() < f64::EPSILON);
        assert_eq!(cfg.resilience.config_cache_ttl_s, 300);
        assert_eq!(cfg.resilience.override_ttl_s, 3600);
        assert_eq!(cfg.aggregator.interval_s, 60);
        assert!(!cfg.maintenance_mode);
    }

    #[test]
    fn validate_rejects_zero_tokens_per_second() {
        let mut cfg = Config::default();
        cfg.rate_limit.tokens_per_second = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_from_applies_env_override() {
        std::env::set_var("PERMIX_MAINTENANCE_MODE", "true");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "maintenance_mode = false\n").unwrap();
        let cfg = Config::load_from(&path).unwrap();
        assert!(cfg.maintenance_mode);
        std::env::remove_var("PERMIX_MAINTENANCE_MODE");
    }
}
