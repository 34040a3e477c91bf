//! Distributed lock (§4.2)
//!
//! `SET key token NX EX ttl`, then release verifies the token before
//! deleting — the same atomic-SET-then-token-checked-release pattern
//! `acton-service/src/lockout/service.rs` uses for its attempt counters,
//! generalized here into a reusable lock primitive instead of inlined
//! per-call `redis::cmd`.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::StoreClient;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Retry policy for lock acquisition.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            interval: Duration::from_millis(20),
        }
    }
}

/// A held lock. `release()` is idempotent; dropping an unreleased handle
/// leaves the key to expire naturally via its TTL.
pub struct LockHandle {
    store: StoreClient,
    key: String,
    token: String,
    released: bool,
}

impl LockHandle {
    /// Verifies the token and deletes the key. Safe to call more than once.
    pub async fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        let script = redis::Script::new(RELEASE_SCRIPT);
        let _: i64 = self
            .store
            .eval_registered(&script, &[self.key.as_str()], &[self.token.clone()])
            .await
            .map(|v| v.first().copied().unwrap_or(0))?;
        self.released = true;
        Ok(())
    }
}

/// Acquires a named lock in the shared store. Default TTL 2.0 s, retry
/// interval 20 ms, 3 retries, matching §4.2's stated defaults.
pub struct DistributedLock {
    store: StoreClient,
}

impl DistributedLock {
    pub fn new(store: StoreClient) -> Self {
        Self { store }
    }

    /// Attempts to acquire `key` for `ttl`, retrying per `policy`. Returns
    /// `None` if the budget is exhausted without acquiring.
    pub async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        policy: RetryPolicy,
    ) -> Result<Option<LockHandle>> {
        let lock_key = format!("lock:{key}");
        for attempt in 0..=policy.retries {
            let token = random_token();
            if self.try_set_nx(&lock_key, &token, ttl).await? {
                debug!(key = %lock_key, attempt, "lock acquired");
                return Ok(Some(LockHandle {
                    store: self.store.clone(),
                    key: lock_key,
                    token,
                    released: false,
                }));
            }
            if attempt < policy.retries {
                tokio::time::sleep(policy.interval).await;
            }
        }
        Ok(None)
    }

    /// Acquires with the default policy, returning an error instead of
    /// `None` on exhaustion — convenient for call sites that treat
    /// contention as a hard failure (e.g. override-hash writers).
    pub async fn acquire_or_err(&self, key: &str, ttl: Duration) -> Result<LockHandle> {
        let policy = RetryPolicy::default();
        match self.acquire(key, ttl, policy).await? {
            Some(handle) => Ok(handle),
            None => Err(Error::LockContention {
                key: key.to_string(),
                attempts: policy.retries,
            }),
        }
    }

    async fn try_set_nx(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        // SET key token NX EX ttl; deadpool/redis's typed helpers don't
        // expose NX+EX together, so issue it as a raw command.
        let script = redis::Script::new(
            r#"
if redis.call("SET", KEYS[1], ARGV[1], "NX", "EX", ARGV[2]) then
    return 1
else
    return 0
end
"#,
        );
        let result = self
            .store
            .eval_registered(&script, &[key], &[token.to_string(), ttl.as_secs().to_string()])
            .await?;
        Ok(result.first().copied().unwrap_or(0) == 1)
    }
}

fn random_token() -> String {
    let mut rng = rand::thread_rng();
    (0..32)
        .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_defaults_match_spec() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retries, 3);
        assert_eq!(policy.interval, Duration::from_millis(20));
    }

    #[test]
    fn random_token_is_nonempty_and_varies() {
        let a = random_token();
        let b = random_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
