//! Shared-store monitor backend, authoritative in production (§4.9)
//!
//! Alert state and metric history live in the shared store so every process
//! observes the same alert set, mirroring the rest of this crate's "the
//! store is the single source of truth for cross-process state" policy.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{Alert, AlertLevel, MetricPoint, MetricStats, MonitorBackend};
use crate::error::Result;
use crate::store::StoreClient;

const HISTORY_KEY_PREFIX: &str = "monitor:history:";
const STATS_KEY_PREFIX: &str = "monitor:stats:";
const ALERTS_KEY: &str = "monitor:alerts";
const ALERT_COUNTERS_KEY: &str = "monitor:alert_counters";
const MAX_HISTORY: isize = 1000;

pub struct StoreBackend {
    store: StoreClient,
}

impl StoreBackend {
    pub fn new(store: StoreClient) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MonitorBackend for StoreBackend {
    async fn record_metric(&self, name: &str, value: f64, tags: Option<serde_json::Value>) -> Result<()> {
        let point = MetricPoint {
            value,
            tags,
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
        };
        let key = format!("{HISTORY_KEY_PREFIX}{name}");
        self.store.lpush(&key, &serde_json::to_string(&point)?).await?;
        self.store.ltrim(&key, 0, MAX_HISTORY - 1).await?;

        let stats_key = format!("{STATS_KEY_PREFIX}{name}");
        let mut stats = self.load_stats(&stats_key).await?;
        stats.record(value);
        self.store.hset(&stats_key, "count", &stats.count.to_string()).await?;
        self.store.hset(&stats_key, "sum", &stats.sum.to_string()).await?;
        self.store.hset(&stats_key, "min", &stats.min.to_string()).await?;
        self.store.hset(&stats_key, "max", &stats.max.to_string()).await?;
        Ok(())
    }

    async fn record_event(&self, name: &str, meta: Option<serde_json::Value>, tags: Option<serde_json::Value>) -> Result<()> {
        let point = MetricPoint {
            value: 0.0,
            tags: tags.or(meta),
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
        };
        let key = format!("{HISTORY_KEY_PREFIX}event:{name}");
        self.store.lpush(&key, &serde_json::to_string(&point)?).await?;
        self.store.ltrim(&key, 0, MAX_HISTORY - 1).await?;
        Ok(())
    }

    async fn get_metrics(&self, name: &str, limit: usize) -> Result<Vec<MetricPoint>> {
        let key = format!("{HISTORY_KEY_PREFIX}{name}");
        let raw = self.store.lrange(&key, 0, limit as isize - 1).await?;
        Ok(raw
            .into_iter()
            .filter_map(|s| serde_json::from_str(&s).ok())
            .collect())
    }

    async fn get_stats(&self, name: &str) -> Result<MetricStats> {
        let stats_key = format!("{STATS_KEY_PREFIX}{name}");
        self.load_stats(&stats_key).await
    }

    async fn create_alert(&self, metric_type: &str, level: AlertLevel, message: &str) -> Result<Alert> {
        let raw = self.store.hgetall(ALERTS_KEY).await.unwrap_or_default();
        for (_, v) in &raw {
            if let Ok(existing) = serde_json::from_str::<Alert>(v) {
                if existing.metric_type == metric_type && existing.level == level && !existing.resolved {
                    return Ok(existing);
                }
            }
        }
        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            metric_type: metric_type.to_string(),
            level,
            message: message.to_string(),
            resolved: false,
            created_at: Utc::now().timestamp_millis() as f64 / 1000.0,
        };
        self.store
            .hset(ALERTS_KEY, &alert.id, &serde_json::to_string(&alert)?)
            .await?;
        self.store.hincr(ALERT_COUNTERS_KEY, level.as_str(), 1).await?;
        Ok(alert)
    }

    async fn get_active_alerts(&self) -> Result<Vec<Alert>> {
        let raw = self.store.hgetall(ALERTS_KEY).await.unwrap_or_default();
        Ok(raw
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_str::<Alert>(&v).ok())
            .filter(|a| !a.resolved)
            .collect())
    }

    async fn resolve_alert(&self, id: &str) -> Result<()> {
        if let Some(raw) = self.store.hget(ALERTS_KEY, id).await? {
            if let Ok(mut alert) = serde_json::from_str::<Alert>(&raw) {
                alert.resolved = true;
                self.store.hset(ALERTS_KEY, id, &serde_json::to_string(&alert)?).await?;
            }
        }
        Ok(())
    }

    async fn get_alert_counters(&self) -> Result<std::collections::HashMap<String, u64>> {
        let raw = self.store.hgetall(ALERT_COUNTERS_KEY).await.unwrap_or_default();
        Ok(raw
            .into_iter()
            .map(|(k, v)| (k, v.parse().unwrap_or(0)))
            .collect())
    }
}

impl StoreBackend {
    async fn load_stats(&self, stats_key: &str) -> Result<MetricStats> {
        let fields = self.store.hgetall(stats_key).await.unwrap_or_default();
        let mut stats = MetricStats::default();
        for (k, v) in fields {
            let parsed: f64 = v.parse().unwrap_or(0.0);
            match k.as_str() {
                "count" => stats.count = parsed as u64,
                "sum" => stats.sum = parsed,
                "min" => stats.min = parsed,
                "max" => stats.max = parsed,
                _ => {}
            }
        }
        Ok(stats)
    }
}
