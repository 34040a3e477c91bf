//! Linear-regression performance predictor (§4.11.1)
//!
//! Grounded directly on `original_source/.../permission_ml.py`'s
//! `MLPerformancePredictor`: a bounded ring of recent samples, a two-
//! parameter linear fit over the most recent 5 points per metric, value
//! clamps, and the urgency/confidence scoring chain.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::metrics::PerformanceMetrics;

const MIN_HISTORY_FOR_PREDICTION: usize = 5;
const TREND_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub metric_name: String,
    pub current_value: f64,
    pub predicted_value: f64,
    pub confidence: f64,
    pub trend: Trend,
    pub recommendation: String,
    pub urgency_level: Urgency,
    pub confidence_score: f64,
}

struct Model {
    slope: f64,
    intercept: f64,
    accuracy: f64,
}

impl Default for Model {
    fn default() -> Self {
        Self { slope: 0.0, intercept: 0.0, accuracy: 0.0 }
    }
}

const TRACKED_METRICS: &[&str] = &["cache_hit_rate", "response_time", "memory_usage", "error_rate", "qps"];

struct Threshold {
    critical: f64,
    high: f64,
    medium: f64,
}

fn urgency_threshold(metric: &str) -> Option<(Threshold, bool)> {
    Some(match metric {
        "cache_hit_rate" => (Threshold { critical: 0.5, high: 0.7, medium: 0.8 }, true),
        "response_time" => (Threshold { critical: 1000.0, high: 500.0, medium: 200.0 }, false),
        "memory_usage" => (Threshold { critical: 0.9, high: 0.8, medium: 0.7 }, false),
        "error_rate" => (Threshold { critical: 0.1, high: 0.05, medium: 0.02 }, false),
        "qps" => (Threshold { critical: 100.0, high: 500.0, medium: 1000.0 }, true),
        _ => return None,
    })
}

pub struct Predictor {
    history_window: usize,
    history: Mutex<VecDeque<PerformanceMetrics>>,
    models: Mutex<HashMap<String, Model>>,
}

impl Predictor {
    pub fn new(history_window: usize) -> Self {
        Self {
            history_window,
            history: Mutex::new(VecDeque::with_capacity(history_window)),
            models: Mutex::new(TRACKED_METRICS.iter().map(|m| (m.to_string(), Model::default())).collect()),
        }
    }

    /// Appends a sample and refits the per-metric linear models.
    pub fn feed(&self, metrics: PerformanceMetrics) {
        let mut history = self.history.lock().unwrap();
        history.push_back(metrics);
        while history.len() > self.history_window {
            history.pop_front();
        }
        drop(history);
        self.refit();
    }

    fn refit(&self) {
        let history = self.history.lock().unwrap();
        if history.len() < 10 {
            return;
        }
        let recent: Vec<&PerformanceMetrics> = history.iter().rev().take(5).collect();
        if recent.len() < 2 {
            return;
        }
        let mut models = self.models.lock().unwrap();
        for metric in TRACKED_METRICS {
            let points: Vec<(f64, f64)> = recent
                .iter()
                .rev()
                .map(|m| (m.timestamp, metric_value(m, metric)))
                .collect();
            if let Some((slope, intercept)) = linear_fit(&points) {
                let model = models.entry(metric.to_string()).or_default();
                model.slope = slope;
                model.intercept = intercept;
            }
        }
    }

    /// `Predict(metric, horizon)` per §4.11.1.
    pub fn predict(&self, metric_name: &str, horizon_s: f64) -> Option<PredictionResult> {
        let history = self.history.lock().unwrap();
        if history.len() < MIN_HISTORY_FOR_PREDICTION {
            return None;
        }
        let current = history.back()?;
        let current_value = metric_value(current, metric_name);
        let now = current.timestamp;

        let models = self.models.lock().unwrap();
        let model = models.get(metric_name)?;
        let future_time = now + horizon_s;
        let raw_predicted = model.slope * future_time + model.intercept;
        let predicted_value = clamp_for_metric(metric_name, raw_predicted);

        let recent: Vec<f64> = history.iter().rev().take(5).map(|m| metric_value(m, metric_name)).collect();
        let trend = trend_from_series(&recent);

        let confidence = (model.accuracy + 0.5).min(0.95);
        let urgency_level = urgency_for(metric_name, current_value);
        let confidence_score = confidence_score(current_value, predicted_value, confidence, urgency_level);
        let recommendation = recommendation_for(metric_name, trend);

        Some(PredictionResult {
            metric_name: metric_name.to_string(),
            current_value,
            predicted_value,
            confidence,
            trend,
            recommendation,
            urgency_level,
            confidence_score,
        })
    }

    pub fn predict_all(&self, horizon_s: f64) -> Vec<PredictionResult> {
        TRACKED_METRICS
            .iter()
            .filter_map(|m| self.predict(m, horizon_s))
            .collect()
    }
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

/// Least-squares fit of `y = slope * x + intercept` over `points`.
fn linear_fit(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    let n = points.len() as f64;
    if n < 2.0 {
        return None;
    }
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xx: f64 = points.iter().map(|(x, _)| x * x).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return Some((0.0, sum_y / n));
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;
    Some((slope, intercept))
}

fn clamp_for_metric(metric: &str, value: f64) -> f64 {
    match metric {
        "response_time" => value.clamp(0.001, 10.0),
        "memory_usage" | "cache_hit_rate" | "error_rate" => value.clamp(0.0, 1.0),
        "qps" => value.clamp(0.0, 10_000.0),
        _ => value.clamp(0.0, 1000.0),
    }
}

fn trend_from_series(recent_newest_first: &[f64]) -> Trend {
    if recent_newest_first.len() < 2 {
        return Trend::Stable;
    }
    let points: Vec<(f64, f64)> = recent_newest_first
        .iter()
        .rev()
        .enumerate()
        .map(|(i, v)| (i as f64, *v))
        .collect();
    let Some((slope, _)) = linear_fit(&points) else {
        return Trend::Stable;
    };
    if slope > TREND_EPSILON {
        Trend::Increasing
    } else if slope < -TREND_EPSILON {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

fn urgency_for(metric: &str, current: f64) -> Urgency {
    let Some((threshold, lower_is_better)) = urgency_threshold(metric) else {
        return Urgency::Low;
    };
    if lower_is_better {
        if current <= threshold.critical {
            Urgency::Critical
        } else if current <= threshold.high {
            Urgency::High
        } else if current <= threshold.medium {
            Urgency::Medium
        } else {
            Urgency::Low
        }
    } else if current > threshold.critical {
        Urgency::Critical
    } else if current > threshold.high {
        Urgency::High
    } else if current > threshold.medium {
        Urgency::Medium
    } else {
        Urgency::Low
    }
}

fn confidence_score(current: f64, predicted: f64, confidence: f64, urgency: Urgency) -> f64 {
    let urgency_multiplier = match urgency {
        Urgency::Critical => 1.2,
        Urgency::High => 1.1,
        Urgency::Medium => 1.0,
        Urgency::Low => 0.8,
    };
    let change_multiplier = if current > 0.0 {
        let change_ratio = (predicted - current).abs() / current;
        if change_ratio > 0.5 {
            0.8
        } else if change_ratio > 0.2 {
            0.9
        } else {
            1.0
        }
    } else {
        1.0
    };
    (confidence * urgency_multiplier * change_multiplier).clamp(0.0, 1.0)
}

fn recommendation_for(metric: &str, trend: Trend) -> String {
    let text = match (metric, trend) {
        ("cache_hit_rate", Trend::Decreasing) => "increase cache size or revisit cache strategy",
        ("cache_hit_rate", Trend::Increasing) => "cache performance healthy, consider further tuning",
        ("cache_hit_rate", Trend::Stable) => "cache performance stable",
        ("response_time", Trend::Increasing) => "optimize queries or increase connection pool size",
        ("response_time", Trend::Decreasing) => "response time improving",
        ("response_time", Trend::Stable) => "response time stable",
        ("memory_usage", Trend::Increasing) => "check for leaks or raise the memory limit",
        ("memory_usage", Trend::Decreasing) => "memory usage improving",
        ("memory_usage", Trend::Stable) => "memory usage stable",
        ("error_rate", Trend::Increasing) => "inspect error logs and address root cause",
        ("error_rate", Trend::Decreasing) => "error rate improving",
        ("error_rate", Trend::Stable) => "error rate stable",
        ("qps", Trend::Decreasing) => "investigate throughput drop or add capacity",
        ("qps", Trend::Increasing) => "throughput increasing",
        ("qps", Trend::Stable) => "throughput stable",
        _ => "monitor this metric",
    };
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: f64, v: f64) -> PerformanceMetrics {
        PerformanceMetrics {
            timestamp: ts,
            cache_hit_rate: v,
            response_time: v,
            error_rate: v,
            memory_usage: v,
            qps: v,
            connection_pool_usage: 0.0,
        }
    }

    #[test]
    fn clamp_bounds_response_time() {
        assert_eq!(clamp_for_metric("response_time", 100.0), 10.0);
        assert_eq!(clamp_for_metric("response_time", 0.0), 0.001);
    }

    #[test]
    fn trend_detects_decreasing_series() {
        let series = vec![0.9, 0.8, 0.7, 0.6, 0.5];
        assert_eq!(trend_from_series(&series), Trend::Decreasing);
    }

    #[test]
    fn predict_requires_minimum_history() {
        let predictor = Predictor::new(1000);
        predictor.feed(sample(1.0, 0.9));
        assert!(predictor.predict("cache_hit_rate", 10.0).is_none());
    }

    #[test]
    fn predict_returns_clamped_result_after_enough_history() {
        let predictor = Predictor::new(1000);
        for i in 0..12 {
            predictor.feed(sample(i as f64, 0.9 - i as f64 * 0.01));
        }
        let result = predictor.predict("cache_hit_rate", 10.0).unwrap();
        assert!((0.0..=1.0).contains(&result.predicted_value));
    }
}
