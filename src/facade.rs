//! Permission system façade (§4.12)
//!
//! The single entry point a caller drives: maintenance-mode gate → cache →
//! optional ABAC call → response-time recording. Everything else
//! (registration, invalidation, stats, optimization suggestions,
//! maintenance toggling) is a thin forwarding wrapper over the composed
//! subsystems, the same "façade over already-built collaborators" shape
//! `acton-service`'s middleware layer uses over its policy/session services.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::warn;

use crate::abac::{AbacClient, AbacInput};
use crate::cache::HybridCache;
use crate::error::{Error, Result};
use crate::invalidation::DelayedInvalidationQueue;
use crate::metrics::PermissionMonitor;
use crate::ml::{MlMonitor, PredictionResult};
use crate::primitives::ScopeType;
use crate::querier::PermissionQuerier;
use crate::resilience::{ConfigKind, ResilienceController};

const GLOBAL_SWITCH_NAME: &str = "maintenance_mode";

/// Optional per-call ABAC context: the façade only consults the policy
/// engine when this is supplied (§4.12 step 4).
#[derive(Debug, Clone)]
pub struct AbacContext {
    pub resource: String,
    pub action: String,
    pub context: Value,
}

pub struct Facade {
    cache: Arc<HybridCache>,
    querier: Arc<PermissionQuerier>,
    resilience: Arc<ResilienceController>,
    monitor: Arc<PermissionMonitor>,
    ml: Arc<MlMonitor>,
    invalidation: Arc<DelayedInvalidationQueue>,
    abac: Option<Arc<AbacClient>>,
}

impl Facade {
    pub fn new(
        cache: Arc<HybridCache>,
        querier: Arc<PermissionQuerier>,
        resilience: Arc<ResilienceController>,
        monitor: Arc<PermissionMonitor>,
        ml: Arc<MlMonitor>,
        invalidation: Arc<DelayedInvalidationQueue>,
        abac: Option<Arc<AbacClient>>,
    ) -> Self {
        Self { cache, querier, resilience, monitor, ml, invalidation, abac }
    }

    /// §4.12: `Check(user_id, permission, scope?, scope_id?, abac_context?)`.
    pub async fn check(
        &self,
        user_id: &str,
        permission: &str,
        scope: Option<ScopeType>,
        scope_id: Option<&str>,
        abac_context: Option<AbacContext>,
    ) -> Result<bool> {
        self.ensure_not_in_maintenance().await?;

        let started = Instant::now();
        let rbac_allowed = self.cache.get_permission(user_id, permission, scope, scope_id).await;

        let allowed = if !rbac_allowed {
            false
        } else if let Some(ctx) = abac_context {
            self.evaluate_abac(user_id, permission, ctx, rbac_allowed).await
        } else {
            rbac_allowed
        };

        self.record_response_time(started).await;
        Ok(allowed)
    }

    async fn evaluate_abac(&self, user_id: &str, permission: &str, ctx: AbacContext, rbac_allowed: bool) -> bool {
        let Some(abac) = &self.abac else {
            return rbac_allowed;
        };
        let input = AbacInput {
            user: user_id.to_string(),
            resource: ctx.resource,
            action: ctx.action,
            context: ctx.context,
        };
        match abac.evaluate(permission, &input).await {
            Ok(result) => rbac_allowed && result.allow,
            Err(e) => {
                warn!(user_id, error = %e, "ABAC evaluation failed, falling back to RBAC result");
                rbac_allowed
            }
        }
    }

    /// §4.12: `BatchCheck(user_ids, permission, scope?, scope_id?)` — same
    /// structure over the batch cache path; ABAC is not consulted per-user
    /// here (spec names only the single-check path for the ABAC hook).
    pub async fn batch_check(
        &self,
        user_ids: &[String],
        permission: &str,
        scope: Option<ScopeType>,
        scope_id: Option<&str>,
    ) -> Result<HashMap<String, bool>> {
        self.ensure_not_in_maintenance().await?;
        let started = Instant::now();
        let results = self.cache.batch_get_permission(user_ids, permission, scope, scope_id).await;
        self.record_response_time(started).await;
        Ok(results)
    }

    async fn ensure_not_in_maintenance(&self) -> Result<()> {
        let active: bool = self
            .resilience
            .get_config(ConfigKind::GlobalSwitch, GLOBAL_SWITCH_NAME, false)
            .await?;
        if active {
            return Err(Error::MaintenanceActive);
        }
        Ok(())
    }

    async fn record_response_time(&self, started: Instant) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        if let Err(e) = self.monitor.record_response_time(elapsed_ms).await {
            warn!(error = %e, "failed to record response time");
        }
    }

    /// §4.12: toggles the global maintenance-mode switch, writing it through
    /// the resilience controller (so the event is published and every
    /// process's config cache is invalidated).
    pub async fn set_maintenance_mode(&self, active: bool, source: &str) -> Result<()> {
        self.resilience
            .set_config(ConfigKind::GlobalSwitch, GLOBAL_SWITCH_NAME, active, true, source)
            .await
    }

    pub async fn register_permission(&self, name: &str, group: Option<&str>, description: Option<&str>) -> Result<()> {
        self.querier.register_permission(name, group, description).await
    }

    pub async fn register_role(
        &self,
        name: &str,
        server_id: &str,
        role_type: &str,
        priority: i32,
        parent_role_id: Option<&str>,
    ) -> Result<String> {
        self.querier.register_role(name, server_id, role_type, priority, parent_role_id).await
    }

    pub async fn assign_role_to_user(&self, user_id: &str, role_id: &str) -> Result<()> {
        self.querier.assign_role_to_user(user_id, role_id).await?;
        self.cache.invalidate_user(user_id).await
    }

    pub async fn assign_permission_to_role(
        &self,
        role_id: &str,
        permission_name: &str,
        scope: Option<ScopeType>,
        scope_id: Option<&str>,
    ) -> Result<()> {
        self.querier.assign_permission_to_role(role_id, permission_name, scope, scope_id).await?;
        self.cache.invalidate_role(role_id).await
    }

    pub async fn invalidate_user(&self, user_id: &str) -> Result<()> {
        self.cache.invalidate_user(user_id).await
    }

    pub async fn invalidate_role(&self, role_id: &str) -> Result<()> {
        self.cache.invalidate_role(role_id).await
    }

    pub async fn batch_invalidate(&self, user_ids: Option<&[String]>, role_ids: Option<&[String]>) -> Result<()> {
        self.cache.batch_invalidate(user_ids, role_ids).await
    }

    /// §B.1: surface the delayed-queue and L1 stats together as one system
    /// status view.
    pub async fn system_stats(&self) -> Result<SystemStats> {
        let invalidation = self.invalidation.stats_snapshot().await?;
        let pending = self.invalidation.pending_count().await?;
        Ok(SystemStats {
            cache_segments: self.cache.segment_stats(),
            invalidation_queue_pending: pending,
            invalidation_stats: invalidation,
            is_system_impaired: self.ml.is_system_impaired(),
        })
    }

    pub fn optimization_suggestions(&self) -> Vec<PredictionResult> {
        self.ml.predictions()
    }
}

#[derive(Debug, Clone)]
pub struct SystemStats {
    pub cache_segments: Vec<(&'static str, u64, u64, usize)>,
    pub invalidation_queue_pending: u64,
    pub invalidation_stats: crate::invalidation::InvalidationStats,
    pub is_system_impaired: bool,
}
