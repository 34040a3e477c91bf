//! Component health aggregation (§4.13)
//!
//! Grounded on `acton-service/src/agents/health.rs`'s `HealthMonitorState`:
//! same cached `HashMap<String, ComponentHealth>` and the same
//! "healthy if empty or every component is healthy" rule, but updated by
//! direct probes against this crate's own collaborators instead of by
//! subscribing to `PoolHealthUpdate` broadcasts from an actor-hosted pool
//! fleet this crate doesn't have.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::abac::AbacClient;
use crate::querier::PermissionQuerier;
use crate::resilience::ResilienceController;
use crate::store::{HealthState as StoreHealthState, StoreClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedHealthResponse {
    pub overall_healthy: bool,
    pub components: Vec<ComponentHealth>,
}

#[derive(Debug, Default)]
struct ComponentMap {
    components: HashMap<String, ComponentHealth>,
}

impl ComponentMap {
    fn is_overall_healthy(&self) -> bool {
        self.components.is_empty()
            || self.components.values().all(|c| c.status == HealthStatus::Healthy)
    }

    fn aggregated(&self) -> AggregatedHealthResponse {
        AggregatedHealthResponse {
            overall_healthy: self.is_overall_healthy(),
            components: self.components.values().cloned().collect(),
        }
    }
}

/// Polls each collaborator's own health surface on demand and caches the
/// result for `get_aggregated_health` — there is no broadcast fleet to
/// subscribe to here, so refresh is pull-based rather than push-based.
pub struct HealthMonitor {
    state: RwLock<ComponentMap>,
    store: Arc<StoreClient>,
    querier: Arc<PermissionQuerier>,
    resilience: Arc<ResilienceController>,
    abac: Option<Arc<AbacClient>>,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<StoreClient>,
        querier: Arc<PermissionQuerier>,
        resilience: Arc<ResilienceController>,
        abac: Option<Arc<AbacClient>>,
    ) -> Self {
        Self { state: RwLock::new(ComponentMap::default()), store, querier, resilience, abac }
    }

    /// Probes every collaborator and refreshes the cached state. Called
    /// during startup warm-up and may be called periodically thereafter.
    pub async fn refresh(&self) {
        let store_status = match self.store.ping().await {
            StoreHealthState::Healthy => {
                ComponentHealth { name: "store".into(), status: HealthStatus::Healthy, detail: None }
            }
            StoreHealthState::Unhealthy => ComponentHealth {
                name: "store".into(),
                status: HealthStatus::Unhealthy,
                detail: Some("store ping failed".into()),
            },
        };

        let db_status = match self.querier.get_users_by_roles(&[]).await {
            Ok(_) => ComponentHealth { name: "database".into(), status: HealthStatus::Healthy, detail: None },
            Err(e) => ComponentHealth {
                name: "database".into(),
                status: HealthStatus::Unhealthy,
                detail: Some(e.to_string()),
            },
        };

        let resilience_status = match self.resilience.active_override_keys().await {
            Ok(_) => {
                ComponentHealth { name: "resilience".into(), status: HealthStatus::Healthy, detail: None }
            }
            Err(e) => ComponentHealth {
                name: "resilience".into(),
                status: HealthStatus::Degraded,
                detail: Some(e.to_string()),
            },
        };

        let mut components = HashMap::new();
        components.insert(store_status.name.clone(), store_status);
        components.insert(db_status.name.clone(), db_status);
        components.insert(resilience_status.name.clone(), resilience_status);

        if let Some(abac) = &self.abac {
            let healthy = abac.health().await;
            components.insert(
                "abac".into(),
                ComponentHealth {
                    name: "abac".into(),
                    status: if healthy { HealthStatus::Healthy } else { HealthStatus::Degraded },
                    detail: None,
                },
            );
        }

        self.state.write().await.components = components;
    }

    pub async fn get_aggregated_health(&self) -> AggregatedHealthResponse {
        self.state.read().await.aggregated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_state_is_healthy() {
        let state = ComponentMap::default();
        assert!(state.is_overall_healthy());
    }

    #[test]
    fn one_unhealthy_component_flips_overall() {
        let mut state = ComponentMap::default();
        state.components.insert(
            "store".into(),
            ComponentHealth { name: "store".into(), status: HealthStatus::Unhealthy, detail: None },
        );
        assert!(!state.is_overall_healthy());
    }
}
