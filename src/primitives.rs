//! Neutral value types shared across modules
//!
//! Pulled out of their natural homes (cache, resilience, events) to avoid the
//! import cycles a single-module layout would create — `cache` needs the
//! event payload shape, `events` needs nothing from `cache`, and `resilience`
//! needs both the event payload and the override shape. Mirrors the role
//! `acton-service/src/ids.rs` plays for that crate's small shared newtypes.

use serde::{Deserialize, Serialize};

/// The scope a permission check is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Server,
    Channel,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Server => "server",
            ScopeType::Channel => "channel",
        }
    }
}

/// Which L1 segment a key belongs to, per §4.6.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    UserPermissions,
    RolePermissions,
    InheritanceTree,
    ConditionalPermissions,
}

/// Permissions resolvable as a plain boolean against the simple L1 cache,
/// without going through the conditional/hybrid path (§4.6.3 step 1).
pub const SIMPLE_PERMISSIONS: &[&str] = &[
    "read_channel",
    "read_message",
    "view_member_list",
    "send_message",
    "edit_message",
    "delete_message",
];

pub fn is_simple_permission(permission: &str) -> bool {
    SIMPLE_PERMISSIONS.contains(&permission)
}

/// Builds the MD5 hash-tagged cache key fingerprint from §3: `md5("{user}:{scope_or_global}:{scope_id_or_none}")`
/// wrapped as `perm:{<hex>}`.
pub fn fingerprint_key(user_id: &str, scope: Option<ScopeType>, scope_id: Option<&str>) -> String {
    let scope_part = scope.map(|s| s.as_str()).unwrap_or("global");
    let scope_id_part = scope_id.unwrap_or("none");
    let raw = format!("{user_id}:{scope_part}:{scope_id_part}");
    let digest = md5::compute(raw.as_bytes());
    format!("perm:{{{digest:x}}}")
}

pub fn user_index_key(user_id: &str) -> String {
    format!("user_index:{{{user_id}}}")
}

pub fn basic_perm_key(user_id: &str, permission: &str) -> String {
    format!("basic_perm:{{{user_id}}}:{permission}")
}

pub fn user_active_key(user_id: &str) -> String {
    format!("user_active:{{{user_id}}}")
}

pub fn user_role_key(user_id: &str) -> String {
    format!("user_role:{{{user_id}}}")
}

pub fn inheritance_key(user_id: &str, permission: &str, parent_role_id: &str) -> String {
    format!("inheritance:{{{user_id}}}:{permission}:{parent_role_id}")
}

/// A curated tuple warmed into the cache before traffic arrives (§4.6.7).
/// The curation policy — which users/permissions go here — is left to the
/// caller; this crate does not hardcode an example list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmUpEntry {
    pub user_id: String,
    pub permission: String,
    pub scope: Option<ScopeType>,
    pub scope_id: Option<String>,
}

/// The envelope every event-bus message carries (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_name: String,
    pub timestamp: f64,
    pub source_module: String,
    pub hostname: String,
    pub pid: u32,
    pub payload: serde_json::Value,
}

/// Outcome of a circuit-breaker atomic transition (§4.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "closed" => Some(CircuitState::Closed),
            "open" => Some(CircuitState::Open),
            "half_open" => Some(CircuitState::HalfOpen),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventIntent {
    NoEvent,
    StateChangedToOpen,
    StateChangedToHalfOpen,
    StateChangedToClosed,
}

impl EventIntent {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "no_event" => Some(EventIntent::NoEvent),
            "state_changed_to_open" => Some(EventIntent::StateChangedToOpen),
            "state_changed_to_half_open" => Some(EventIntent::StateChangedToHalfOpen),
            "state_changed_to_closed" => Some(EventIntent::StateChangedToClosed),
            _ => None,
        }
    }
}

/// Invalidation execution strategy (§4.7.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationStrategy {
    Aggressive,
    Conservative,
    Auto,
}

/// ML optimizer strategy (§4.11.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerStrategy {
    Conservative,
    Aggressive,
    Adaptive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_hash_tagged() {
        let key = fingerprint_key("u1", Some(ScopeType::Server), Some("s1"));
        assert!(key.starts_with("perm:{"));
        assert!(key.ends_with('}'));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint_key("u1", None, None);
        let b = fingerprint_key("u1", None, None);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_distinguishes_scope() {
        let global = fingerprint_key("u1", None, None);
        let scoped = fingerprint_key("u1", Some(ScopeType::Server), Some("s1"));
        assert_ne!(global, scoped);
    }

    #[test]
    fn simple_permission_classification() {
        assert!(is_simple_permission("read_channel"));
        assert!(!is_simple_permission("manage_roles"));
    }
}
