//! Permission monitor (§4.10)
//!
//! Sits atop a [`MonitorBackend`], applies the threshold table, and stages
//! every recorded numeric metric to the aggregator so the ML predictor sees
//! it on its next minute boundary.

use std::sync::Arc;

use tracing::debug;

use super::aggregator::MetricsAggregator;
use super::backends::{Alert, MonitorBackend};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Gauge,
    Counter,
    Histogram,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Excellent,
    Good,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy)]
struct Threshold {
    warning: f64,
    error: f64,
    critical: f64,
    lower_is_worse: bool,
}

const THRESHOLDS: &[(&str, Threshold)] = &[
    (
        "cache_hit_rate",
        Threshold { warning: 0.8, error: 0.6, critical: 0.4, lower_is_worse: true },
    ),
    (
        "response_time",
        Threshold { warning: 100.0, error: 200.0, critical: 500.0, lower_is_worse: false },
    ),
    (
        "error_rate",
        Threshold { warning: 0.05, error: 0.1, critical: 0.2, lower_is_worse: false },
    ),
    (
        "memory_usage",
        Threshold { warning: 0.7, error: 0.85, critical: 0.95, lower_is_worse: false },
    ),
    (
        "qps",
        Threshold { warning: 1000.0, error: 500.0, critical: 100.0, lower_is_worse: true },
    ),
];

fn threshold_for(metric: &str) -> Option<Threshold> {
    THRESHOLDS.iter().find(|(name, _)| *name == metric).map(|(_, t)| *t)
}

/// Classifies `value` against `metric`'s threshold table (§4.10); `None` if
/// the metric has no registered threshold.
pub fn status_for(metric: &str, value: f64) -> Option<HealthStatus> {
    let t = threshold_for(metric)?;
    Some(if t.lower_is_worse {
        if value <= t.critical {
            HealthStatus::Error
        } else if value <= t.error {
            HealthStatus::Warning
        } else if value <= t.warning {
            HealthStatus::Good
        } else {
            HealthStatus::Excellent
        }
    } else if value >= t.critical {
        HealthStatus::Error
    } else if value >= t.error {
        HealthStatus::Warning
    } else if value >= t.warning {
        HealthStatus::Good
    } else {
        HealthStatus::Excellent
    })
}

fn worst(a: HealthStatus, b: HealthStatus) -> HealthStatus {
    fn rank(s: HealthStatus) -> u8 {
        match s {
            HealthStatus::Excellent => 0,
            HealthStatus::Good => 1,
            HealthStatus::Warning => 2,
            HealthStatus::Error => 3,
        }
    }
    if rank(a) >= rank(b) {
        a
    } else {
        b
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OverallHealth {
    pub cache: HealthStatus,
    pub performance: HealthStatus,
    pub error: HealthStatus,
    pub overall: HealthStatus,
}

pub struct PermissionMonitor {
    backend: Arc<dyn MonitorBackend>,
    aggregator: Arc<MetricsAggregator>,
}

impl PermissionMonitor {
    pub fn new(backend: Arc<dyn MonitorBackend>, aggregator: Arc<MetricsAggregator>) -> Self {
        Self { backend, aggregator }
    }

    /// §4.10: records a value, optionally checking alert thresholds, and
    /// stages every numeric (non-event) metric to the aggregator.
    pub async fn record(
        &self,
        name: &str,
        value: f64,
        record_type: RecordType,
        tags: Option<serde_json::Value>,
        check_alerts: bool,
    ) -> Result<()> {
        if record_type == RecordType::Event {
            self.backend.record_event(name, None, tags).await?;
            return Ok(());
        }

        self.backend.record_metric(name, value, tags).await?;
        self.aggregator.stage_metric(name, value).await?;

        if check_alerts {
            if let Some(status) = status_for(name, value) {
                if matches!(status, HealthStatus::Warning | HealthStatus::Error) {
                    let level = if matches!(status, HealthStatus::Error) {
                        super::backends::AlertLevel::Critical
                    } else {
                        super::backends::AlertLevel::Warning
                    };
                    let alert = self
                        .backend
                        .create_alert(name, level, &format!("{name}={value}"))
                        .await?;
                    debug!(metric = name, alert_id = alert.id, "alert evaluated");
                }
            }
        }
        Ok(())
    }

    pub async fn record_cache_hit_rate(&self, value: f64) -> Result<()> {
        self.record("cache_hit_rate", value, RecordType::Gauge, None, true).await
    }

    pub async fn record_response_time(&self, value: f64) -> Result<()> {
        self.record("response_time", value, RecordType::Gauge, None, true).await
    }

    pub async fn record_error_rate(&self, value: f64) -> Result<()> {
        self.record("error_rate", value, RecordType::Gauge, None, true).await
    }

    pub async fn record_qps(&self, value: f64) -> Result<()> {
        self.record("qps", value, RecordType::Gauge, None, true).await
    }

    pub async fn active_alerts(&self) -> Result<Vec<Alert>> {
        self.backend.get_active_alerts().await
    }

    /// §4.10: worst-of composition across cache/performance/error statuses.
    pub fn overall_health(&self, cache_hit_rate: f64, response_time: f64, error_rate: f64) -> OverallHealth {
        let cache = status_for("cache_hit_rate", cache_hit_rate).unwrap_or(HealthStatus::Excellent);
        let performance = status_for("response_time", response_time).unwrap_or(HealthStatus::Excellent);
        let error = status_for("error_rate", error_rate).unwrap_or(HealthStatus::Excellent);
        let overall = worst(worst(cache, performance), error);
        OverallHealth { cache, performance, error, overall }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_hit_rate_direction_is_lower_worse() {
        assert_eq!(status_for("cache_hit_rate", 0.9), Some(HealthStatus::Excellent));
        assert_eq!(status_for("cache_hit_rate", 0.3), Some(HealthStatus::Error));
    }

    #[test]
    fn response_time_direction_is_higher_worse() {
        assert_eq!(status_for("response_time", 50.0), Some(HealthStatus::Excellent));
        assert_eq!(status_for("response_time", 600.0), Some(HealthStatus::Error));
    }

    #[test]
    fn worst_picks_the_higher_rank() {
        assert_eq!(worst(HealthStatus::Good, HealthStatus::Error), HealthStatus::Error);
    }
}
