//! Process lifecycle: startup composition and graceful shutdown (§4.13, §5)
//!
//! Wires every subsystem built so far into one running [`System`] in the
//! exact order spec'd: store/lock, resilience, monitor, aggregator, ML,
//! cache/querier/invalidation, façade, cross-wiring, then an asynchronous
//! warm-up pass. Shutdown reverses the background-loop half of that order:
//! one stop signal, bounded joins, then the store client last.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::abac::AbacClient;
use crate::agents::HealthMonitor;
use crate::cache::HybridCache;
use crate::config::Config;
use crate::error::Result;
use crate::events::EventBus;
use crate::facade::Facade;
use crate::invalidation::{DelayedInvalidationQueue, InvalidationWorkers, SmartExecutor};
use crate::metrics::backends::MemoryBackend;
use crate::metrics::{spawn_aggregation_loop, MetricsAggregator, PermissionMonitor};
use crate::ml::MlMonitor;
use crate::primitives::OptimizerStrategy;
use crate::querier::PermissionQuerier;
use crate::resilience::ResilienceController;
use crate::store::StoreClient;

/// Every long-lived handle the running process holds, plus the façade
/// callers actually drive. Dropping this without calling [`System::shutdown`]
/// leaves background loops running until the process exits.
pub struct System {
    pub facade: Arc<Facade>,
    pub health: Arc<HealthMonitor>,
    resilience_sub: crate::events::Subscription,
    ml_sub: crate::events::Subscription,
    invalidation_workers: Option<InvalidationWorkers>,
    aggregation_loop: tokio::task::JoinHandle<()>,
    aggregation_cancel: CancellationToken,
    aggregator: Arc<MetricsAggregator>,
    ml: Arc<MlMonitor>,
    store: StoreClient,
}

impl System {
    /// Builds and starts the full permission system per §4.13's nine-step
    /// order, then runs the asynchronous warm-up pass before returning.
    pub async fn start(cfg: &Config) -> Result<Self> {
        // 1. Shared-store client. Each subsystem below builds its own
        // `DistributedLock` from this client (§4.2 is a stateless wrapper
        // over the shared store, cheap to construct per collaborator).
        let store = StoreClient::connect(&cfg.store).await?;
        let events = EventBus::new(&cfg.store.url, cfg.service_name.clone())?;

        // 2. Resilience controller (subscribes to config-updates; scripts
        // are lazily registered on first invocation per `store::scripts`).
        let resilience = Arc::new(ResilienceController::new(
            store.clone(),
            events.clone(),
            cfg.resilience.clone(),
        ));
        let resilience_sub = resilience.subscribe_invalidation();
        resilience_sub.ready().await;

        // 3. Monitor backend, permission monitor.
        let aggregator = Arc::new(MetricsAggregator::new(store.clone()));
        let backend = Arc::new(MemoryBackend::new());
        let monitor = Arc::new(PermissionMonitor::new(backend, aggregator.clone()));

        // 5. ML monitor (subscribes to resilience events) — constructed
        // ahead of step 4's loop since the aggregator hands snapshots to it.
        let ml = Arc::new(MlMonitor::new(OptimizerStrategy::Adaptive, resilience.clone(), events.clone()));
        let ml_sub = ml.subscribe_resilience_events(&events);
        ml_sub.ready().await;

        // 4. Metrics aggregator (wired to ML monitor).
        let aggregation_cancel = CancellationToken::new();
        let ml_for_loop = ml.clone();
        let aggregation_loop = spawn_aggregation_loop(aggregator.clone(), aggregation_cancel.clone(), move |metrics| {
            let ml = ml_for_loop.clone();
            tokio::spawn(async move {
                if let Err(e) = ml.feed_metrics(metrics).await {
                    warn!(error = %e, "ML monitor failed to ingest metrics snapshot");
                }
            });
        });

        // 6. Permission cache, querier, delayed-invalidation engine.
        let querier = Arc::new(PermissionQuerier::connect(&cfg.database).await?);
        let cache = Arc::new(HybridCache::new(&cfg.cache, store.clone(), querier.clone(), events.clone()));
        let invalidation_queue = Arc::new(DelayedInvalidationQueue::new(store.clone()));
        let smart_executor = Arc::new(SmartExecutor::new(store.clone(), events.clone()));
        let invalidation_workers = InvalidationWorkers::spawn(
            invalidation_queue.clone(),
            smart_executor,
            store.clone(),
            cfg.delayed.clone(),
        );

        let abac = if cfg.abac.enabled { Some(Arc::new(AbacClient::new(&cfg.abac)?)) } else { None };

        // 7. Façade.
        let facade = Arc::new(Facade::new(
            cache.clone(),
            querier.clone(),
            resilience.clone(),
            monitor.clone(),
            ml.clone(),
            invalidation_queue.clone(),
            abac.clone(),
        ));

        // 8. Cross-wiring: register a config-update callback so an
        // auto-applied optimization plan is observable to operators as soon
        // as it lands, even though the tunables it touches (pool sizes,
        // timeouts) are read by this process's own runtime config rather
        // than round-tripped back through the resilience controller.
        ml.register_config_update_callback(Arc::new(|plan: &std::collections::HashMap<String, f64>| {
            info!(?plan, "ML optimizer applied a new runtime configuration");
        }))
        .await;

        let health = Arc::new(HealthMonitor::new(
            Arc::new(store.clone()),
            querier.clone(),
            resilience.clone(),
            abac.clone(),
        ));

        let system = Self {
            facade,
            health,
            resilience_sub,
            ml_sub,
            invalidation_workers: Some(invalidation_workers),
            aggregation_loop,
            aggregation_cancel,
            aggregator,
            ml,
            store,
        };

        // 9. Asynchronous warm-up.
        system.warm_up(cfg).await;

        Ok(system)
    }

    /// §4.13 step 9: loads the last 24 h of per-minute snapshots into the
    /// predictor, runs the cache warm-up list, and reports component health.
    /// Best-effort — a failure here never blocks startup.
    async fn warm_up(&self, cfg: &Config) {
        match self.aggregator.load_recent_history().await {
            Ok(history) if !history.is_empty() => {
                info!(count = history.len(), "replaying persisted metrics history into predictor");
                self.ml.seed_history(history);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to load persisted metrics history"),
        }

        if !cfg.cache.warm_up_entries.is_empty() {
            info!(count = cfg.cache.warm_up_entries.len(), "running cache warm-up list");
            if let Err(e) = self.facade_cache_warm_up(cfg).await {
                warn!(error = %e, "cache warm-up pass failed");
            }
        }
        self.health.refresh().await;
        let health = self.health.get_aggregated_health().await;
        if !health.overall_healthy {
            let components = &health.components;
            warn!(?components, "one or more components unhealthy after warm-up");
        }
    }

    async fn facade_cache_warm_up(&self, cfg: &Config) -> Result<()> {
        for entry in &cfg.cache.warm_up_entries {
            self.facade
                .check(&entry.user_id, &entry.permission, entry.scope, entry.scope_id.as_deref(), None)
                .await?;
        }
        Ok(())
    }

    /// §4.13 shutdown: one stop signal for every background loop, a bounded
    /// join, subscriptions closed subscriber → pubsub, then the store client.
    pub async fn shutdown(mut self) {
        info!("shutting down permission system");

        self.aggregation_cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.aggregation_loop).await;

        if let Some(workers) = self.invalidation_workers.take() {
            workers.stop().await;
        }

        self.resilience_sub.stop().await;
        self.ml_sub.stop().await;

        drop(self.store);
        info!("permission system shutdown complete");
    }
}
