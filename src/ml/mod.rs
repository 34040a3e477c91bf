//! ML performance monitoring (§4.11)
//!
//! Composes [`Predictor`], [`Optimizer`], and [`AnomalyDetector`] behind a
//! single impairment-gated ingestion point, mirroring
//! `original_source/.../permission_ml.py`'s `MLPerformanceMonitor`.

pub mod anomaly;
pub mod impairment;
pub mod optimizer;
pub mod predictor;

pub use anomaly::{Anomaly, AnomalyDetector, Severity};
pub use impairment::ImpairmentTracker;
pub use optimizer::{ConfigUpdateCallback, Optimizer, OptimizerConfig};
pub use predictor::{PredictionResult, Predictor, Trend, Urgency};

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::events::EventBus;
use crate::metrics::PerformanceMetrics;
use crate::primitives::OptimizerStrategy;
use crate::resilience::ResilienceController;

const TRACKED_METRICS: &[&str] = &["cache_hit_rate", "response_time", "memory_usage", "error_rate", "qps"];
const DEFAULT_HISTORY_WINDOW: usize = 1000;

pub struct MlMonitor {
    predictor: Predictor,
    optimizer: Optimizer,
    anomaly_detector: AnomalyDetector,
    impairment: Arc<ImpairmentTracker>,
}

impl MlMonitor {
    pub fn new(strategy: OptimizerStrategy, resilience: Arc<ResilienceController>, events: EventBus) -> Self {
        Self {
            predictor: Predictor::new(DEFAULT_HISTORY_WINDOW),
            optimizer: Optimizer::new(strategy, resilience, events),
            anomaly_detector: AnomalyDetector::new(),
            impairment: Arc::new(ImpairmentTracker::new()),
        }
    }

    /// Subscribes the monitor's impairment tracker to the resilience event
    /// bus. Must be called once during startup; the returned subscription
    /// should be kept alive for the process lifetime.
    pub fn subscribe_resilience_events(&self, events: &EventBus) -> crate::events::Subscription {
        self.impairment.subscribe(events)
    }

    /// §4.11.3: feeds a validated performance snapshot into the predictor,
    /// anomaly detector, and optimizer — unless the system is currently
    /// impaired, in which case the sample is silently dropped to avoid
    /// polluting the models.
    pub async fn feed_metrics(&self, metrics: PerformanceMetrics) -> Result<()> {
        if self.impairment.is_impaired() {
            warn!(timestamp = metrics.timestamp, "system impaired, dropping metrics sample");
            return Ok(());
        }

        self.predictor.feed(metrics);
        let anomalies = self.anomaly_detector.detect(&metrics);
        if !anomalies.is_empty() {
            warn!(count = anomalies.len(), "anomalies detected in performance metrics");
        }
        self.optimizer.check_and_optimize(&self.predictor).await?;
        debug!(timestamp = metrics.timestamp, "ML module processed performance metrics");
        Ok(())
    }

    /// §4.13 step 9: seeds the predictor directly from persisted history,
    /// bypassing the impairment gate, anomaly detector, and optimizer —
    /// this is a warm-up replay, not a live sample.
    pub fn seed_history(&self, history: Vec<PerformanceMetrics>) {
        for metrics in history {
            self.predictor.feed(metrics);
        }
    }

    pub fn is_system_impaired(&self) -> bool {
        self.impairment.is_impaired()
    }

    pub fn predictions(&self) -> Vec<PredictionResult> {
        TRACKED_METRICS
            .iter()
            .filter_map(|m| self.predictor.predict(m, 300.0))
            .collect()
    }

    pub async fn optimized_config(&self) -> OptimizerConfig {
        self.optimizer.current_config().await
    }

    pub fn anomalies(&self) -> Vec<Anomaly> {
        self.anomaly_detector.history()
    }

    pub async fn optimization_history(&self) -> Vec<optimizer::OptimizationRecord> {
        self.optimizer.history().await
    }

    pub async fn set_optimization_strategy(&self, strategy: OptimizerStrategy) {
        self.optimizer.set_strategy(strategy).await;
    }

    pub async fn register_config_update_callback(&self, callback: ConfigUpdateCallback) {
        self.optimizer.register_config_update_callback(callback).await;
    }
}
