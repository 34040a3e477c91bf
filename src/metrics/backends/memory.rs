//! In-process monitor backend, for development (§4.9)

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{Alert, AlertLevel, MetricPoint, MetricStats, MonitorBackend};
use crate::error::Result;

const MAX_HISTORY: usize = 1000;

#[derive(Default)]
struct Inner {
    points: HashMap<String, Vec<MetricPoint>>,
    stats: HashMap<String, MetricStats>,
    alerts: HashMap<String, Alert>,
    alert_counters: HashMap<String, u64>,
}

/// Keeps everything in a single process-local mutex; lost on restart, used
/// for local development per §4.9.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MonitorBackend for MemoryBackend {
    async fn record_metric(&self, name: &str, value: f64, tags: Option<serde_json::Value>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let history = inner.points.entry(name.to_string()).or_default();
        history.push(MetricPoint {
            value,
            tags,
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
        });
        if history.len() > MAX_HISTORY {
            let overflow = history.len() - MAX_HISTORY;
            history.drain(0..overflow);
        }
        inner.stats.entry(name.to_string()).or_default().record(value);
        Ok(())
    }

    async fn record_event(&self, name: &str, meta: Option<serde_json::Value>, tags: Option<serde_json::Value>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let history = inner.points.entry(format!("event:{name}")).or_default();
        history.push(MetricPoint {
            value: 0.0,
            tags: tags.or(meta),
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
        });
        if history.len() > MAX_HISTORY {
            let overflow = history.len() - MAX_HISTORY;
            history.drain(0..overflow);
        }
        Ok(())
    }

    async fn get_metrics(&self, name: &str, limit: usize) -> Result<Vec<MetricPoint>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .points
            .get(name)
            .map(|pts| pts.iter().rev().take(limit).rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_stats(&self, name: &str) -> Result<MetricStats> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.stats.get(name).copied().unwrap_or_default())
    }

    async fn create_alert(&self, metric_type: &str, level: AlertLevel, message: &str) -> Result<Alert> {
        let mut inner = self.inner.lock().unwrap();
        let existing = inner.alerts.values().find(|a| {
            a.metric_type == metric_type && a.level == level && !a.resolved
        });
        if let Some(alert) = existing {
            return Ok(alert.clone());
        }
        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            metric_type: metric_type.to_string(),
            level,
            message: message.to_string(),
            resolved: false,
            created_at: Utc::now().timestamp_millis() as f64 / 1000.0,
        };
        *inner.alert_counters.entry(level.as_str().to_string()).or_insert(0) += 1;
        inner.alerts.insert(alert.id.clone(), alert.clone());
        Ok(alert)
    }

    async fn get_active_alerts(&self) -> Result<Vec<Alert>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.alerts.values().filter(|a| !a.resolved).cloned().collect())
    }

    async fn resolve_alert(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(alert) = inner.alerts.get_mut(id) {
            alert.resolved = true;
        }
        Ok(())
    }

    async fn get_alert_counters(&self) -> Result<HashMap<String, u64>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.alert_counters.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_alert_bumps_counter_only_on_first_creation() {
        let backend = MemoryBackend::new();
        backend.create_alert("cache_hit_rate", AlertLevel::Warning, "low hit rate").await.unwrap();
        backend.create_alert("cache_hit_rate", AlertLevel::Warning, "still low").await.unwrap();
        let counters = backend.get_alert_counters().await.unwrap();
        assert_eq!(counters.get("warning"), Some(&1));
    }

    #[tokio::test]
    async fn stats_track_min_max_mean() {
        let backend = MemoryBackend::new();
        backend.record_metric("qps", 10.0, None).await.unwrap();
        backend.record_metric("qps", 20.0, None).await.unwrap();
        let stats = backend.get_stats("qps").await.unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 20.0);
        assert_eq!(stats.mean(), 15.0);
    }
}
