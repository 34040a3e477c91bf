//! Adaptive configuration optimizer (§4.11.2)
//!
//! Watches the predictor's critical/high-urgency issues and, above a
//! confidence gate and absent any manual override, applies a bounded
//! adjustment to a handful of runtime parameters — mirroring
//! `original_source/.../permission_ml.py`'s `AdaptiveOptimizer`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::predictor::{PredictionResult, Predictor, Trend, Urgency};
use crate::error::Result;
use crate::events::{EventBus, ML_AUTO_APPLIED_CHANNEL};
use crate::primitives::OptimizerStrategy;
use crate::resilience::ResilienceController;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub connection_pool_size: f64,
    pub socket_timeout: f64,
    pub lock_timeout: f64,
    pub batch_size: f64,
    pub cache_max_size: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            connection_pool_size: 100.0,
            socket_timeout: 0.5,
            lock_timeout: 3.0,
            batch_size: 200.0,
            cache_max_size: 1000.0,
        }
    }
}

struct Range {
    min: f64,
    max: f64,
}

fn parameter_range(name: &str) -> Option<Range> {
    Some(match name {
        "connection_pool_size" => Range { min: 10.0, max: 200.0 },
        "socket_timeout" => Range { min: 0.1, max: 2.0 },
        "lock_timeout" => Range { min: 1.0, max: 10.0 },
        "batch_size" => Range { min: 50.0, max: 500.0 },
        "cache_max_size" => Range { min: 500.0, max: 2000.0 },
        _ => return None,
    })
}

const AUTO_APPLY_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationRecord {
    pub timestamp: f64,
    pub issues: Vec<PredictionResult>,
    pub optimization_plan: HashMap<String, f64>,
    pub strategy: OptimizerStrategy,
    pub auto_applied: bool,
    pub avg_confidence_score: f64,
    pub has_manual_overrides: bool,
}

pub type ConfigUpdateCallback = Arc<dyn Fn(&HashMap<String, f64>) + Send + Sync>;

pub struct Optimizer {
    strategy: Mutex<OptimizerStrategy>,
    current_config: Mutex<OptimizerConfig>,
    history: Mutex<Vec<OptimizationRecord>>,
    callbacks: Mutex<Vec<ConfigUpdateCallback>>,
    resilience: Arc<ResilienceController>,
    events: EventBus,
}

impl Optimizer {
    pub fn new(strategy: OptimizerStrategy, resilience: Arc<ResilienceController>, events: EventBus) -> Self {
        Self {
            strategy: Mutex::new(strategy),
            current_config: Mutex::new(OptimizerConfig::default()),
            history: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
            resilience,
            events,
        }
    }

    pub async fn set_strategy(&self, strategy: OptimizerStrategy) {
        *self.strategy.lock().await = strategy;
    }

    pub async fn current_config(&self) -> OptimizerConfig {
        self.current_config.lock().await.clone()
    }

    pub async fn history(&self) -> Vec<OptimizationRecord> {
        self.history.lock().await.clone()
    }

    pub async fn register_config_update_callback(&self, callback: ConfigUpdateCallback) {
        self.callbacks.lock().await.push(callback);
    }

    /// §4.11.2: re-evaluates the predictor's current critical/high issues and,
    /// if present, runs the optimization pass.
    pub async fn check_and_optimize(&self, predictor: &Predictor) -> Result<()> {
        let predictions = predictor.predict_all(300.0);
        let critical: Vec<PredictionResult> = predictions
            .into_iter()
            .filter(|p| matches!(p.urgency_level, Urgency::Critical | Urgency::High))
            .collect();
        if critical.is_empty() {
            return Ok(());
        }
        self.perform_optimization(critical).await
    }

    async fn perform_optimization(&self, issues: Vec<PredictionResult>) -> Result<()> {
        let avg_confidence_score =
            issues.iter().map(|i| i.confidence_score).sum::<f64>() / issues.len() as f64;

        let overrides = self.resilience.active_override_keys().await?;
        let has_manual_overrides = !overrides.is_empty();
        let should_auto_apply = avg_confidence_score >= AUTO_APPLY_THRESHOLD && !has_manual_overrides;

        let strategy = *self.strategy.lock().await;
        let plan = self.create_optimization_plan(&issues, strategy).await;
        if plan.is_empty() {
            return Ok(());
        }

        if should_auto_apply {
            self.apply_optimization(plan.clone(), &overrides).await?;
            self.publish_auto_applied_event(&issues, &plan, avg_confidence_score).await;
            info!(avg_confidence_score, "auto-applied ML optimization");
        } else if has_manual_overrides {
            info!(overrides = ?overrides, "ML optimization suggestion blocked by manual override");
        } else {
            info!(
                avg_confidence_score,
                threshold = AUTO_APPLY_THRESHOLD,
                "ML optimization suggestion below confidence threshold, not auto-applied"
            );
        }

        self.history.lock().await.push(OptimizationRecord {
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
            issues,
            optimization_plan: plan,
            strategy,
            auto_applied: should_auto_apply,
            avg_confidence_score,
            has_manual_overrides,
        });
        Ok(())
    }

    async fn create_optimization_plan(
        &self,
        issues: &[PredictionResult],
        strategy: OptimizerStrategy,
    ) -> HashMap<String, f64> {
        let current = self.current_config.lock().await;
        let mut plan = HashMap::new();

        for issue in issues {
            match (issue.metric_name.as_str(), issue.trend) {
                ("cache_hit_rate", Trend::Decreasing) => {
                    let value = match strategy {
                        OptimizerStrategy::Aggressive => {
                            (current.cache_max_size * 1.5).min(2000.0)
                        }
                        OptimizerStrategy::Conservative => {
                            (current.cache_max_size * 1.2).min(1500.0)
                        }
                        OptimizerStrategy::Adaptive => {
                            (current.cache_max_size * 1.3).min(1800.0)
                        }
                    };
                    plan.insert("cache_max_size".to_string(), value);
                }
                ("response_time", Trend::Increasing) => {
                    let (pool, timeout) = match strategy {
                        OptimizerStrategy::Aggressive => (
                            (current.connection_pool_size * 1.5).min(200.0),
                            (current.socket_timeout * 0.8).max(0.1),
                        ),
                        OptimizerStrategy::Conservative => (
                            (current.connection_pool_size * 1.2).min(150.0),
                            (current.socket_timeout * 0.9).max(0.2),
                        ),
                        OptimizerStrategy::Adaptive => (
                            (current.connection_pool_size * 1.3).min(180.0),
                            (current.socket_timeout * 0.85).max(0.15),
                        ),
                    };
                    plan.insert("connection_pool_size".to_string(), pool);
                    plan.insert("socket_timeout".to_string(), timeout);
                }
                ("error_rate", Trend::Increasing) => {
                    let value = match strategy {
                        OptimizerStrategy::Aggressive => {
                            (current.lock_timeout * 1.5).min(10.0)
                        }
                        OptimizerStrategy::Conservative => {
                            (current.lock_timeout * 1.2).min(8.0)
                        }
                        OptimizerStrategy::Adaptive => (current.lock_timeout * 1.3).min(9.0),
                    };
                    plan.insert("lock_timeout".to_string(), value);
                }
                _ => {}
            }
        }
        plan
    }

    /// Filters `plan` against `overrides` (substring match against the
    /// override field name, preserved from the original's own imprecise
    /// matching — see the grounding ledger's Open Question note), clamps
    /// to each parameter's range, and notifies registered callbacks.
    async fn apply_optimization(&self, plan: HashMap<String, f64>, overrides: &[String]) -> Result<()> {
        let mut filtered = HashMap::new();
        for (param, value) in plan {
            let has_override = overrides.iter().any(|o| o.contains(&param));
            if has_override {
                warn!(param, "skipping ML optimization parameter due to manual override");
                continue;
            }
            filtered.insert(param, value);
        }

        if filtered.is_empty() {
            info!("no ML optimization parameters applied, all were overridden");
            return Ok(());
        }

        let mut current = self.current_config.lock().await;
        for (param, value) in &filtered {
            let Some(range) = parameter_range(param) else { continue };
            let clamped = value.clamp(range.min, range.max);
            match param.as_str() {
                "connection_pool_size" => current.connection_pool_size = clamped,
                "socket_timeout" => current.socket_timeout = clamped,
                "lock_timeout" => current.lock_timeout = clamped,
                "batch_size" => current.batch_size = clamped,
                "cache_max_size" => current.cache_max_size = clamped,
                _ => {}
            }
        }
        drop(current);

        let callbacks = self.callbacks.lock().await;
        for callback in callbacks.iter() {
            callback(&filtered);
        }
        info!(plan = ?filtered, "applied ML optimization configuration");
        Ok(())
    }

    async fn publish_auto_applied_event(
        &self,
        issues: &[PredictionResult],
        plan: &HashMap<String, f64>,
        avg_confidence_score: f64,
    ) {
        let payload = serde_json::json!({
            "issues": issues,
            "optimization_plan": plan,
            "avg_confidence_score": avg_confidence_score,
            "auto_applied": true,
        });
        let _ = self
            .events
            .publish(ML_AUTO_APPLIED_CHANNEL, "ml.optimization.auto_applied", payload)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_range_clamps_cache_max_size() {
        let range = parameter_range("cache_max_size").unwrap();
        assert_eq!((range.min, range.max), (500.0, 2000.0));
    }
}
