//! Prometheus monitor backend (§4.9)
//!
//! Grounded on `spineldb-spineldb/src/core/metrics.rs`'s global-registry
//! `register_*!` macro idiom (there built on `lazy_static!`; here on
//! `once_cell::sync::Lazy`, already this crate's statics primitive).
//! Queries (`GetMetrics`/`GetStats`) aren't meaningful against a pull-based
//! exporter, so they return empty, same contract as the statsd sink.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use prometheus::{register_gauge_vec, register_int_counter_vec, GaugeVec, IntCounterVec};

use super::{Alert, AlertLevel, MetricPoint, MetricStats, MonitorBackend};
use crate::error::Result;

static STAGED_METRICS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("permix_metric", "staged permission-service metrics", &["name"]).unwrap()
});

static EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("permix_event_total", "recorded permission-service events", &["name"]).unwrap()
});

static ALERTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("permix_alert_total", "created alerts", &["metric_type", "level"]).unwrap()
});

#[derive(Default)]
pub struct PrometheusBackend {
    alert_counters: Mutex<HashMap<String, u64>>,
}

impl PrometheusBackend {
    pub fn new() -> Self {
        Lazy::force(&STAGED_METRICS);
        Lazy::force(&EVENTS_TOTAL);
        Lazy::force(&ALERTS_TOTAL);
        Self::default()
    }
}

#[async_trait]
impl MonitorBackend for PrometheusBackend {
    async fn record_metric(&self, name: &str, value: f64, _tags: Option<serde_json::Value>) -> Result<()> {
        STAGED_METRICS.with_label_values(&[name]).set(value);
        Ok(())
    }

    async fn record_event(&self, name: &str, _meta: Option<serde_json::Value>, _tags: Option<serde_json::Value>) -> Result<()> {
        EVENTS_TOTAL.with_label_values(&[name]).inc();
        Ok(())
    }

    async fn get_metrics(&self, _name: &str, _limit: usize) -> Result<Vec<MetricPoint>> {
        Ok(Vec::new())
    }

    async fn get_stats(&self, _name: &str) -> Result<MetricStats> {
        Ok(MetricStats::default())
    }

    async fn create_alert(&self, metric_type: &str, level: AlertLevel, message: &str) -> Result<Alert> {
        ALERTS_TOTAL.with_label_values(&[metric_type, level.as_str()]).inc();
        *self
            .alert_counters
            .lock()
            .unwrap()
            .entry(level.as_str().to_string())
            .or_insert(0) += 1;
        Ok(Alert {
            id: String::new(),
            metric_type: metric_type.to_string(),
            level,
            message: message.to_string(),
            resolved: false,
            created_at: 0.0,
        })
    }

    async fn get_active_alerts(&self) -> Result<Vec<Alert>> {
        Ok(Vec::new())
    }

    async fn resolve_alert(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn get_alert_counters(&self) -> Result<HashMap<String, u64>> {
        Ok(self.alert_counters.lock().unwrap().clone())
    }
}
