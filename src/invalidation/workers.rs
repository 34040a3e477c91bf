//! Background invalidation daemons (§4.7.4, §4.7.5)
//!
//! Three independent loops, each its own `tokio::spawn` + cancellation token
//! pair in the same shape `acton-service/src/agents/background_worker.rs`
//! uses for its poll loops, minus the actor-runtime wrapper (see DESIGN.md).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::executor::SmartExecutor;
use super::queue::DelayedInvalidationQueue;
use crate::config::DelayedInvalidationConfig;
use crate::primitives::InvalidationStrategy;
use crate::store::StoreClient;

const SMART_INVALIDATOR_INTERVAL_S: u64 = 300;
const CLEANUP_INTERVAL_S: u64 = 600;
const QUEUE_MAX_AGE_S: i64 = 3600;

const REVERSE_INDEX_PREFIXES: &[&str] = &[
    super::queue::REASON_INDEX_PREFIX,
    super::queue::USER_INDEX_PREFIX,
    super::queue::PATTERN_INDEX_PREFIX,
];

/// A running set of invalidation daemons; dropping the handle leaves the
/// tasks running, call `stop()` for a clean, joined shutdown.
pub struct InvalidationWorkers {
    cancel: CancellationToken,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl InvalidationWorkers {
    /// Spawns the delayed processor, smart invalidator, and orphan-cleanup
    /// loops, returning a handle that stops all three together.
    pub fn spawn(
        queue: Arc<DelayedInvalidationQueue>,
        executor: Arc<SmartExecutor>,
        store: StoreClient,
        cfg: DelayedInvalidationConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        handles.push(tokio::spawn(delayed_processor_loop(
            queue.clone(),
            executor.clone(),
            cfg.clone(),
            cancel.child_token(),
        )));
        handles.push(tokio::spawn(smart_invalidator_loop(
            queue.clone(),
            executor,
            cfg,
            cancel.child_token(),
        )));
        handles.push(tokio::spawn(cleanup_loop(queue, store, cancel.child_token())));

        Self { cancel, handles }
    }

    /// Cancels every loop and waits (bounded) for them to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        let (tx, mut rx) = mpsc::channel::<()>(1);
        for handle in self.handles {
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = handle.await;
                let _ = tx.send(()).await;
            });
        }
        drop(tx);
        while rx.recv().await.is_some() {}
    }
}

/// §4.7.4: drains `batch_size` tasks roughly every `processor_interval_ms`,
/// but only once the queue has grown past `min_queue_size` — small queues
/// are left alone so the smart invalidator's periodic sweep handles them.
async fn delayed_processor_loop(
    queue: Arc<DelayedInvalidationQueue>,
    executor: Arc<SmartExecutor>,
    cfg: DelayedInvalidationConfig,
    cancel: CancellationToken,
) {
    let interval = Duration::from_millis(cfg.processor_interval_ms);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let pending = match queue.pending_count().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "delayed processor failed to read queue depth");
                continue;
            }
        };
        if pending < cfg.min_queue_size as u64 {
            continue;
        }

        match executor
            .run(&queue, InvalidationStrategy::Conservative, cfg.batch_size as usize)
            .await
        {
            Ok(result) => {
                if result.removed > 0 {
                    debug!(removed = result.removed, "delayed processor drained batch");
                }
            }
            Err(e) => warn!(error = %e, "delayed processor batch failed"),
        }
    }
    info!("delayed processor loop stopped");
}

/// §4.7.4: a coarser periodic aggressive sweep, catching whatever the
/// steady-state processor couldn't keep up with.
async fn smart_invalidator_loop(
    queue: Arc<DelayedInvalidationQueue>,
    executor: Arc<SmartExecutor>,
    cfg: DelayedInvalidationConfig,
    cancel: CancellationToken,
) {
    let interval = Duration::from_secs(SMART_INVALIDATOR_INTERVAL_S);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match executor
            .run(&queue, InvalidationStrategy::Auto, cfg.batch_size as usize * 5)
            .await
        {
            Ok(result) => {
                if result.removed > 0 {
                    info!(removed = result.removed, "smart invalidator sweep applied");
                }
            }
            Err(e) => warn!(error = %e, "smart invalidator sweep failed"),
        }
    }
    info!("smart invalidator loop stopped");
}

/// §4.7.5: drops queue entries older than an hour and reverse-index members
/// whose referenced reverse-index set has emptied out (the set itself still
/// TTLs after 24h, but an orphaned entry inside a still-live set would
/// otherwise linger until that set's own expiry).
async fn cleanup_loop(queue: Arc<DelayedInvalidationQueue>, store: StoreClient, cancel: CancellationToken) {
    let interval = Duration::from_secs(CLEANUP_INTERVAL_S);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match queue.cleanup_older_than(QUEUE_MAX_AGE_S).await {
            Ok(removed) if removed > 0 => info!(removed, "expired queue entries cleaned up"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "queue cleanup failed"),
        }

        if let Err(e) = sweep_orphan_indexes(&store).await {
            warn!(error = %e, "orphan reverse-index sweep failed");
        }
    }
    info!("cleanup loop stopped");
}

async fn sweep_orphan_indexes(store: &StoreClient) -> crate::error::Result<()> {
    for prefix in REVERSE_INDEX_PREFIXES {
        let pattern = format!("{prefix}*");
        let keys = store.scan_match(&pattern, 200).await?;
        for key in keys {
            let count = store.scard(&key).await.unwrap_or(0);
            if count == 0 {
                let _ = store.del(&key).await;
            }
        }
    }
    Ok(())
}
