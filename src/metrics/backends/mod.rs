//! Pluggable monitor backend interface (§4.9)

pub mod memory;
pub mod prometheus;
pub mod statsd;
pub mod store;

pub use memory::MemoryBackend;
pub use prometheus::PrometheusBackend;
pub use statsd::StatsdBackend;
pub use store::StoreBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub value: f64,
    pub tags: Option<serde_json::Value>,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct MetricStats {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricStats {
    pub fn record(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub metric_type: String,
    pub level: AlertLevel,
    pub message: String,
    pub resolved: bool,
    pub created_at: f64,
}

/// One interface, four sinks (§4.9). Backends never propagate write failures
/// to the caller beyond a logged warning — metrics recording must not be
/// able to break a permission check.
#[async_trait]
pub trait MonitorBackend: Send + Sync {
    async fn record_metric(&self, name: &str, value: f64, tags: Option<serde_json::Value>) -> Result<()>;
    async fn record_event(&self, name: &str, meta: Option<serde_json::Value>, tags: Option<serde_json::Value>) -> Result<()>;
    async fn get_metrics(&self, name: &str, limit: usize) -> Result<Vec<MetricPoint>>;
    async fn get_stats(&self, name: &str) -> Result<MetricStats>;
    async fn create_alert(&self, metric_type: &str, level: AlertLevel, message: &str) -> Result<Alert>;
    async fn get_active_alerts(&self) -> Result<Vec<Alert>>;
    async fn resolve_alert(&self, id: &str) -> Result<()>;
    async fn get_alert_counters(&self) -> Result<std::collections::HashMap<String, u64>>;
}
