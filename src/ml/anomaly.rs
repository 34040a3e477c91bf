//! Rolling z-score anomaly detector (§4.11.4)
//!
//! Grounded on `original_source/.../permission_ml.py`'s `AnomalyDetector`:
//! a 100-sample window per metric, z-score against the window's mean/std,
//! with the new sample appended only after the score is computed.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::metrics::PerformanceMetrics;

const WINDOW_SIZE: usize = 100;
const THRESHOLD_STD: f64 = 2.0;
const MIN_SAMPLES: usize = 10;

const TRACKED_METRICS: &[&str] = &["cache_hit_rate", "response_time", "memory_usage", "error_rate", "qps"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub metric: String,
    pub value: f64,
    pub expected_range: (f64, f64),
    pub z_score: f64,
    pub timestamp: f64,
    pub severity: Severity,
}

pub struct AnomalyDetector {
    windows: Mutex<HashMap<String, VecDeque<f64>>>,
    history: Mutex<Vec<Anomaly>>,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(
                TRACKED_METRICS
                    .iter()
                    .map(|m| (m.to_string(), VecDeque::with_capacity(WINDOW_SIZE)))
                    .collect(),
            ),
            history: Mutex::new(Vec::new()),
        }
    }

    /// §4.11.4: runs every tracked metric in `metrics` through its window,
    /// appending to the window only after scoring. Standalone per-value
    /// lookups use [`AnomalyDetector::check`].
    pub fn detect(&self, metrics: &PerformanceMetrics) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();
        let mut windows = self.windows.lock().unwrap();
        for name in TRACKED_METRICS {
            let value = metric_value(metrics, name);
            let window = windows.entry(name.to_string()).or_default();
            if let Some(anomaly) = score(name, value, window, metrics.timestamp) {
                anomalies.push(anomaly);
            }
            window.push_back(value);
            while window.len() > WINDOW_SIZE {
                window.pop_front();
            }
        }
        drop(windows);

        if !anomalies.is_empty() {
            self.history.lock().unwrap().extend(anomalies.clone());
        }
        anomalies
    }

    /// Standalone check of a single `(metric, value)` pair against its
    /// current window, without feeding the value forward (§B item 4).
    pub fn check(&self, metric: &str, value: f64, timestamp: f64) -> Option<Anomaly> {
        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(metric.to_string()).or_default();
        let anomaly = score(metric, value, window, timestamp);
        window.push_back(value);
        while window.len() > WINDOW_SIZE {
            window.pop_front();
        }
        if let Some(a) = &anomaly {
            self.history.lock().unwrap().push(a.clone());
        }
        anomaly
    }

    pub fn history(&self) -> Vec<Anomaly> {
        self.history.lock().unwrap().clone()
    }
}

fn score(metric: &str, value: f64, window: &VecDeque<f64>, timestamp: f64) -> Option<Anomaly> {
    if window.len() < MIN_SAMPLES {
        return None;
    }
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / window.len() as f64;
    let std = variance.sqrt();
    if std <= 0.0 {
        return None;
    }
    let z_score = (value - mean).abs() / std;
    if z_score <= THRESHOLD_STD {
        return None;
    }
    Some(Anomaly {
        metric: metric.to_string(),
        value,
        expected_range: (mean - 2.0 * std, mean + 2.0 * std),
        z_score,
        timestamp,
        severity: if z_score > 3.0 { Severity::High } else { Severity::Medium },
    })
}

fn metric_value(m: &PerformanceMetrics, name: &str) -> f64 {
    match name {
        "cache_hit_rate" => m.cache_hit_rate,
        "response_time" => m.response_time,
        "memory_usage" => m.memory_usage,
        "error_rate" => m.error_rate,
        "qps" => m.qps,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_outlier_after_warm_window() {
        let detector = AnomalyDetector::new();
        for i in 0..15 {
            detector.check("response_time", 100.0 + i as f64, i as f64);
        }
        let anomaly = detector.check("response_time", 5000.0, 15.0);
        assert!(anomaly.is_some());
        assert_eq!(anomaly.unwrap().severity, Severity::High);
    }

    #[test]
    fn requires_minimum_samples() {
        let detector = AnomalyDetector::new();
        for i in 0..5 {
            assert!(detector.check("qps", 100.0 + i as f64, i as f64).is_none());
        }
    }
}
