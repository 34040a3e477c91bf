//! Crate-wide error type
//!
//! One variant per external failure domain, matching the propagation policy
//! in spec §7: data-plane calls (`Check`) never let these escape as hard
//! failures, they fall back or translate to a denial; control-plane
//! mutations (`Set*Config`, `Assign*`) surface them to the caller.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds exposed by the permission core.
#[derive(Debug, Error)]
pub enum Error {
    /// The shared store is unreachable (connection refused, DNS failure, all
    /// cluster nodes down).
    #[error("shared store unavailable: {0}")]
    StoreUnavailable(String),

    /// A shared-store call exceeded its deadline.
    #[error("shared store timed out: {0}")]
    StoreTimeout(String),

    /// The shared store rejected authentication.
    #[error("shared store authentication failed: {0}")]
    StoreAuth(String),

    /// A distributed lock could not be acquired within its retry budget.
    #[error("lock contention on {key}: exhausted {attempts} attempt(s)")]
    LockContention {
        /// The lock key that was contended.
        key: String,
        /// Number of acquisition attempts made.
        attempts: u32,
    },

    /// Serializing or deserializing a value failed.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The caller does not hold the requested permission.
    #[error("permission denied")]
    PermissionDenied,

    /// The global maintenance-mode switch is active.
    #[error("system is in maintenance mode")]
    MaintenanceActive,

    /// A dependency (database, ABAC engine) answered but reported degraded
    /// operation.
    #[error("backend degraded: {0}")]
    BackendDegraded(String),

    /// A call to an upstream collaborator (relational store, ABAC engine)
    /// failed outright.
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),
}

impl Error {
    /// True for errors a background worker should treat as transient and
    /// retry after a penalty sleep, per §7's worker-loop policy.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_) | Error::StoreTimeout(_) | Error::LockContention { .. }
        )
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
            Error::StoreUnavailable(e.to_string())
        } else if e.is_timeout() {
            Error::StoreTimeout(e.to_string())
        } else if e.kind() == redis::ErrorKind::AuthenticationFailed {
            Error::StoreAuth(e.to_string())
        } else {
            Error::UpstreamFailure(format!("redis: {e}"))
        }
    }
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut => Error::StoreTimeout("permission querier pool".into()),
            sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
                Error::StoreUnavailable(e.to_string())
            }
            other => Error::UpstreamFailure(format!("sqlx: {other}")),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Error::ConfigInvalid(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::UpstreamFailure(format!("abac http: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::StoreUnavailable("x".into()).is_transient());
        assert!(Error::StoreTimeout("x".into()).is_transient());
        assert!(Error::LockContention { key: "k".into(), attempts: 3 }.is_transient());
        assert!(!Error::PermissionDenied.is_transient());
        assert!(!Error::MaintenanceActive.is_transient());
    }
}
