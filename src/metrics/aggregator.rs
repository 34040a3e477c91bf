//! Per-minute metrics aggregator (§4.8)
//!
//! Staged values accumulate in a per-minute shared-store hash; a background
//! loop assembles the previous minute into a validated `PerformanceMetrics`
//! snapshot and hands it to the ML predictor, mirroring
//! `original_source/.../metrics_aggregator.py`'s stage/aggregate split.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::StoreClient;

const SNAPSHOT_PREFIX: &str = "monitor:metrics_snapshot:";
const SNAPSHOT_TTL_S: i64 = 120;
const AGGREGATION_INTERVAL_S: u64 = 5;

pub const REQUIRED_METRICS: &[&str] = &[
    "cache_hit_rate",
    "response_time",
    "error_rate",
    "memory_usage",
    "qps",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub timestamp: f64,
    pub cache_hit_rate: f64,
    pub response_time: f64,
    pub error_rate: f64,
    pub memory_usage: f64,
    pub qps: f64,
    pub connection_pool_usage: f64,
}

pub struct MetricsAggregator {
    store: StoreClient,
}

impl MetricsAggregator {
    pub fn new(store: StoreClient) -> Self {
        Self { store }
    }

    /// §4.8: writes into the current minute's snapshot hash with a 120 s TTL.
    pub async fn stage_metric(&self, name: &str, value: f64) -> Result<()> {
        let key = format!("{SNAPSHOT_PREFIX}{}", minute_start());
        self.store.hset(&key, name, &value.to_string()).await?;
        self.store.expire(&key, SNAPSHOT_TTL_S).await?;
        Ok(())
    }

    /// Reads and validates the *previous* minute's snapshot, deleting it
    /// once consumed. Returns `None` if the snapshot is missing, incomplete,
    /// or contains a non-finite/negative value.
    pub async fn collect_previous_minute(&self) -> Result<Option<PerformanceMetrics>> {
        let key = format!("{SNAPSHOT_PREFIX}{}", minute_start() - 60);
        let fields = self.store.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let mut values = std::collections::HashMap::new();
        for (name, raw) in &fields {
            match raw.parse::<f64>() {
                Ok(v) if v.is_finite() && v >= 0.0 => {
                    values.insert(name.clone(), v);
                }
                _ => {
                    warn!(metric = name, raw, "discarding snapshot with invalid value");
                    let _ = self.store.del(&key).await;
                    return Ok(None);
                }
            }
        }

        for required in REQUIRED_METRICS {
            if !values.contains_key(*required) {
                warn!(missing = required, "discarding incomplete metrics snapshot");
                let _ = self.store.del(&key).await;
                return Ok(None);
            }
        }

        let metrics = PerformanceMetrics {
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
            cache_hit_rate: values["cache_hit_rate"],
            response_time: values["response_time"],
            error_rate: values["error_rate"],
            memory_usage: values["memory_usage"],
            qps: values["qps"],
            connection_pool_usage: values.get("connection_pool_usage").copied().unwrap_or(0.0),
        };
        let _ = self.store.del(&key).await;
        self.append_history(&metrics).await;
        Ok(Some(metrics))
    }

    /// Appends `metrics` to the rolling 24 h per-minute history list,
    /// trimmed to `HISTORY_MAX_ENTRIES`. Best-effort: a store failure here
    /// only costs replay fidelity on the next startup, not correctness now.
    async fn append_history(&self, metrics: &PerformanceMetrics) {
        let Ok(member) = serde_json::to_string(metrics) else { return };
        if self.store.lpush(HISTORY_KEY, &member).await.is_ok() {
            let _ = self.store.ltrim(HISTORY_KEY, 0, HISTORY_MAX_ENTRIES - 1).await;
        }
    }

    /// §4.13 step 9: replays up to the last 24 h of per-minute snapshots,
    /// oldest first, for predictor warm-up.
    pub async fn load_recent_history(&self) -> Result<Vec<PerformanceMetrics>> {
        let raw = self.store.lrange(HISTORY_KEY, 0, HISTORY_MAX_ENTRIES - 1).await?;
        let mut metrics: Vec<PerformanceMetrics> = raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect();
        metrics.reverse();
        Ok(metrics)
    }
}

const HISTORY_KEY: &str = "monitor:metrics_history";
/// One entry per minute for 24 h.
const HISTORY_MAX_ENTRIES: isize = 1440;

fn minute_start() -> i64 {
    (Utc::now().timestamp() / 60) * 60
}

/// Spawns the 5 s aggregation loop, delivering each validated snapshot to
/// `on_snapshot` (the ML predictor's `feed_metrics`, per §4.11.3's
/// impairment gate on the receiving end).
pub fn spawn_aggregation_loop<F>(
    aggregator: Arc<MetricsAggregator>,
    cancel: CancellationToken,
    on_snapshot: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(PerformanceMetrics) + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let interval = Duration::from_secs(AGGREGATION_INTERVAL_S);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            match aggregator.collect_previous_minute().await {
                Ok(Some(metrics)) => {
                    debug!(qps = metrics.qps, "metrics snapshot assembled");
                    on_snapshot(metrics);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "metrics aggregation pass failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_metrics_match_spec() {
        assert_eq!(
            REQUIRED_METRICS,
            &["cache_hit_rate", "response_time", "error_rate", "memory_usage", "qps"]
        );
    }
}
