//! Permission querier (§4.5)
//!
//! Pool creation/backoff and error categorization carried over from
//! `acton-service/src/database.rs`; the queries themselves are the join
//! chain `Permission ← RolePermission ← UserRole` spec §4.5/§3 describes.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{error, warn};

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::primitives::ScopeType;

/// A safety bound on inheritance-chain walks; cycles are impossible by
/// construction (single-parent, enforced at write time) but implementations
/// must still break out defensively (§4.5.3).
const MAX_INHERITANCE_DEPTH: usize = 64;

pub struct PermissionQuerier {
    pool: PgPool,
}

impl PermissionQuerier {
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .min_connections(cfg.min_connections)
            .acquire_timeout(Duration::from_secs(cfg.acquire_timeout_s))
            .connect(&cfg.url)
            .await
            .map_err(|e| {
                error!(error = %categorize_db_error(&e), "permission querier connect failed");
                Error::from(e)
            })?;
        Ok(Self { pool })
    }

    /// One join query filtered by `user_id` and, when a scope is given, by
    /// `role.server_id`/`role.role_type` and `role_permission.scope_type`/
    /// `scope_id`.
    pub async fn get_user_permissions(
        &self,
        user_id: &str,
        scope: Option<ScopeType>,
        scope_id: Option<&str>,
    ) -> Result<HashSet<String>> {
        let rows = self.run_permission_query(&[user_id], scope, scope_id).await;
        match rows {
            Ok(rows) => Ok(rows
                .get(user_id)
                .cloned()
                .unwrap_or_default()),
            Err(e) => {
                warn!(user_id, error = %e, "permission query failed, returning empty set");
                Ok(HashSet::new())
            }
        }
    }

    /// Same join extended to `user_id IN (...)`, aggregated in memory.
    pub async fn batch_get_user_permissions(
        &self,
        user_ids: &[String],
        scope: Option<ScopeType>,
        scope_id: Option<&str>,
    ) -> Result<HashMap<String, HashSet<String>>> {
        let refs: Vec<&str> = user_ids.iter().map(String::as_str).collect();
        match self.run_permission_query(&refs, scope, scope_id).await {
            Ok(rows) => Ok(rows),
            Err(e) => {
                warn!(count = user_ids.len(), error = %e, "batch permission query failed");
                Ok(user_ids.iter().map(|u| (u.clone(), HashSet::new())).collect())
            }
        }
    }

    async fn run_permission_query(
        &self,
        user_ids: &[&str],
        scope: Option<ScopeType>,
        scope_id: Option<&str>,
    ) -> Result<HashMap<String, HashSet<String>>> {
        let mut query = String::from(
            "SELECT ur.user_id, p.name \
             FROM permission p \
             JOIN role_permission rp ON rp.permission_id = p.id \
             JOIN role r ON r.id = rp.role_id \
             JOIN user_role ur ON ur.role_id = r.id \
             WHERE ur.user_id = ANY($1) AND r.active = true",
        );
        if scope.is_some() {
            query.push_str(" AND r.role_type = $2 AND rp.scope_type = $2");
            if scope_id.is_some() {
                query.push_str(" AND rp.scope_id = $3");
            }
        }

        let mut built = sqlx::query(&query).bind(user_ids);
        if let Some(scope) = scope {
            built = built.bind(scope.as_str());
            if let Some(scope_id) = scope_id {
                built = built.bind(scope_id);
            }
        }

        let rows: Vec<PgRow> = built.fetch_all(&self.pool).await.map_err(|e| {
            error!(error = %categorize_db_error(&e), "permission query failed");
            Error::from(e)
        })?;

        let mut result: HashMap<String, HashSet<String>> = HashMap::new();
        for row in rows {
            let user_id: String = row.try_get("user_id").map_err(Error::from)?;
            let name: String = row.try_get("name").map_err(Error::from)?;
            result.entry(user_id).or_default().insert(name);
        }
        Ok(result)
    }

    /// Includes every `parent_role_id` transitively (single-parent chain),
    /// bounded by `MAX_INHERITANCE_DEPTH` as a defensive backstop.
    pub async fn gather_role_ids_with_inheritance(
        &self,
        role_ids: &[String],
    ) -> Result<HashSet<String>> {
        let mut gathered: HashSet<String> = role_ids.iter().cloned().collect();
        let mut frontier: Vec<String> = role_ids.to_vec();

        for _ in 0..MAX_INHERITANCE_DEPTH {
            if frontier.is_empty() {
                break;
            }
            let rows: Vec<(String, Option<String>)> = sqlx::query_as(
                "SELECT id, parent_role_id FROM role WHERE id = ANY($1)",
            )
            .bind(&frontier)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::from)?;

            let mut next_frontier = Vec::new();
            for (_, parent) in rows {
                if let Some(parent_id) = parent {
                    if gathered.insert(parent_id.clone()) {
                        next_frontier.push(parent_id);
                    }
                }
            }
            frontier = next_frontier;
        }

        Ok(gathered)
    }

    pub async fn get_users_by_role(&self, role_id: &str) -> Result<Vec<String>> {
        self.get_users_by_roles(&[role_id.to_string()]).await
    }

    pub async fn get_users_by_roles(&self, role_ids: &[String]) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT user_id FROM user_role WHERE role_id = ANY($1)",
        )
        .bind(role_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %categorize_db_error(&e), "get_users_by_roles failed");
            Error::from(e)
        })?;
        Ok(rows.into_iter().map(|(u,)| u).collect())
    }

    /// §4.12 "register permission" wrapper. The database is the runtime
    /// source of truth (§3); this is a plain insert, not a cache mutation —
    /// callers invalidate the cache separately if a rename/remove affects
    /// existing holders.
    pub async fn register_permission(
        &self,
        name: &str,
        group: Option<&str>,
        description: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO permission (name, \"group\", description, deprecated) \
             VALUES ($1, $2, $3, false) \
             ON CONFLICT (name) DO UPDATE SET \"group\" = EXCLUDED.\"group\", description = EXCLUDED.description",
        )
        .bind(name)
        .bind(group)
        .bind(description)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %categorize_db_error(&e), "register_permission failed");
            Error::from(e)
        })?;
        Ok(())
    }

    /// §4.12 "register role" wrapper.
    pub async fn register_role(
        &self,
        name: &str,
        server_id: &str,
        role_type: &str,
        priority: i32,
        parent_role_id: Option<&str>,
    ) -> Result<String> {
        let row: (String,) = sqlx::query_as(
            "INSERT INTO role (name, server_id, role_type, priority, parent_role_id, active) \
             VALUES ($1, $2, $3, $4, $5, true) \
             ON CONFLICT (name, server_id) DO UPDATE SET priority = EXCLUDED.priority \
             RETURNING id",
        )
        .bind(name)
        .bind(server_id)
        .bind(role_type)
        .bind(priority)
        .bind(parent_role_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %categorize_db_error(&e), "register_role failed");
            Error::from(e)
        })?;
        Ok(row.0)
    }

    /// §4.12 "assign" wrapper: grants `role_id` to `user_id`.
    pub async fn assign_role_to_user(&self, user_id: &str, role_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_role (user_id, role_id) VALUES ($1, $2) \
             ON CONFLICT (user_id, role_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(role_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %categorize_db_error(&e), "assign_role_to_user failed");
            Error::from(e)
        })?;
        Ok(())
    }

    /// §4.12 "assign" wrapper: binds `permission_id` to `role_id` in a scope.
    pub async fn assign_permission_to_role(
        &self,
        role_id: &str,
        permission_name: &str,
        scope: Option<ScopeType>,
        scope_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO role_permission (role_id, permission_id, scope_type, scope_id) \
             SELECT $1, p.id, $3, $4 FROM permission p WHERE p.name = $2 \
             ON CONFLICT (role_id, permission_id, scope_type, scope_id) DO NOTHING",
        )
        .bind(role_id)
        .bind(permission_name)
        .bind(scope.map(|s| s.as_str()))
        .bind(scope_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %categorize_db_error(&e), "assign_permission_to_role failed");
            Error::from(e)
        })?;
        Ok(())
    }
}

/// Human-readable category for logging, mirroring
/// `acton-service::database::categorize_db_error`.
fn categorize_db_error(e: &sqlx::Error) -> &'static str {
    match e {
        sqlx::Error::PoolTimedOut => "connection",
        sqlx::Error::Database(_) => "integrity",
        sqlx::Error::RowNotFound => "data",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_pool_timeout_as_connection() {
        assert_eq!(categorize_db_error(&sqlx::Error::PoolTimedOut), "connection");
    }
}
