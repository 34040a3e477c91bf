//! Smart batch executor (§4.7.3)
//!
//! Pulls a bounded sample of queued tasks, selects a subset per the active
//! [`InvalidationStrategy`], removes the matched entries from the queue
//! atomically via [`REMOVE_TASKS_BY_KEYS`](crate::store::scripts::REMOVE_TASKS_BY_KEYS),
//! then clears the underlying cache keys and tidies the reverse indices that
//! pointed at them.

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info, warn};

use super::queue::{CacheLevel, DelayedInvalidationQueue, InvalidationTask, QUEUE_KEY};
use crate::error::Result;
use crate::events::{EventBus, CACHE_INVALIDATED_CHANNEL};
use crate::primitives::InvalidationStrategy;
use crate::store::scripts::REMOVE_TASKS_BY_KEYS;
use crate::store::StoreClient;

const ATTENTION_THRESHOLD: u64 = 100;
const SAMPLE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionResult {
    pub matched: usize,
    pub removed: i64,
}

pub struct SmartExecutor {
    store: StoreClient,
    events: EventBus,
}

impl SmartExecutor {
    pub fn new(store: StoreClient, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Runs one pass of the smart executor against `queue`, removing up to
    /// `batch_size` tasks chosen by `strategy`.
    pub async fn run(
        &self,
        queue: &DelayedInvalidationQueue,
        strategy: InvalidationStrategy,
        batch_size: usize,
    ) -> Result<ExecutionResult> {
        let sample = queue.oldest(SAMPLE_SIZE).await?;
        if sample.is_empty() {
            return Ok(ExecutionResult::default());
        }

        let selected = select_batch(&sample, strategy, batch_size);
        if selected.is_empty() {
            return Ok(ExecutionResult::default());
        }

        let temp_key = format!("invalidation_exec_batch:{}", random_suffix());
        for task in &selected {
            let member = serde_json::to_string(task)?;
            self.store.sadd(&temp_key, &member).await?;
        }
        self.store.expire(&temp_key, 10).await?;

        let removed: i64 = self
            .store
            .eval_registered(&REMOVE_TASKS_BY_KEYS, &[&temp_key, QUEUE_KEY], &[])
            .await?;
        let _ = self.store.del(&temp_key).await;

        for task in &selected {
            self.clear_cache_key(task).await;
            self.drop_reverse_index_refs(task).await;
        }

        queue.record_processed("batch_invalidations", removed).await?;

        info!(
            strategy = ?strategy,
            matched = selected.len(),
            removed,
            "invalidation batch executed"
        );
        Ok(ExecutionResult {
            matched: selected.len(),
            removed,
        })
    }

    async fn clear_cache_key(&self, task: &InvalidationTask) {
        if matches!(task.cache_level, CacheLevel::L2 | CacheLevel::Both) {
            if let Err(e) = self.store.del(&task.cache_key).await {
                warn!(key = %task.cache_key, error = %e, "failed clearing cache key during batch execution");
            }
        }
        if let Err(e) = self
            .events
            .publish(
                CACHE_INVALIDATED_CHANNEL,
                "cache.batch_invalidated",
                serde_json::json!({ "config_type": "cache_key", "config_name": task.cache_key }),
            )
            .await
        {
            debug!(error = %e, "batch invalidation event publish failed");
        }
    }

    async fn drop_reverse_index_refs(&self, task: &InvalidationTask) {
        let reason_idx = format!("{}{}", super::queue::REASON_INDEX_PREFIX, task.reason);
        let _ = self.store.srem(&reason_idx, &task.cache_key).await;

        let pattern = task.cache_key.split(':').next().unwrap_or(&task.cache_key);
        let pattern_idx = format!("{}{}", super::queue::PATTERN_INDEX_PREFIX, pattern);
        let _ = self.store.srem(&pattern_idx, &task.cache_key).await;

        if let Some(user_id) = super::queue::parse_user_id(&task.cache_key) {
            let user_idx = format!("{}{}", super::queue::USER_INDEX_PREFIX, user_id);
            let _ = self.store.srem(&user_idx, &task.cache_key).await;
        }
    }
}

fn select_batch(
    sample: &[InvalidationTask],
    strategy: InvalidationStrategy,
    batch_size: usize,
) -> Vec<InvalidationTask> {
    match strategy {
        InvalidationStrategy::Conservative => sample.iter().take(batch_size).cloned().collect(),
        InvalidationStrategy::Aggressive => sample.to_vec(),
        InvalidationStrategy::Auto => {
            if sample.len() as u64 >= ATTENTION_THRESHOLD {
                sample.to_vec()
            } else {
                sample.iter().take(batch_size).cloned().collect()
            }
        }
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::queue::CacheLevel;

    fn task(key: &str) -> InvalidationTask {
        InvalidationTask {
            cache_key: key.to_string(),
            cache_level: CacheLevel::Both,
            reason: "test".to_string(),
            timestamp: 0.0,
            processed: false,
        }
    }

    #[test]
    fn conservative_caps_at_batch_size() {
        let sample: Vec<_> = (0..10).map(|i| task(&format!("k{i}"))).collect();
        let selected = select_batch(&sample, InvalidationStrategy::Conservative, 3);
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn aggressive_takes_entire_sample() {
        let sample: Vec<_> = (0..10).map(|i| task(&format!("k{i}"))).collect();
        let selected = select_batch(&sample, InvalidationStrategy::Aggressive, 3);
        assert_eq!(selected.len(), 10);
    }

    #[test]
    fn auto_falls_back_to_conservative_below_threshold() {
        let sample: Vec<_> = (0..5).map(|i| task(&format!("k{i}"))).collect();
        let selected = select_batch(&sample, InvalidationStrategy::Auto, 2);
        assert_eq!(selected.len(), 2);
    }
}
