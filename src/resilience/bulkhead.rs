//! Bulkhead (§4.4.3)

use crate::error::Result;
use crate::store::scripts::BULKHEAD_EXEC;
use crate::store::StoreClient;

use super::now_unix;

#[derive(Debug, Clone, Copy)]
pub struct BulkheadStats {
    pub active_calls: i64,
    pub total_calls: i64,
    pub failed_calls: i64,
}

pub struct Bulkhead {
    store: StoreClient,
}

impl Bulkhead {
    pub fn new(store: StoreClient) -> Self {
        Self { store }
    }

    async fn op(&self, name: &str, op: &str, max_concurrent: u32) -> Result<(bool, BulkheadStats)> {
        let key = format!("bulkhead:{{{name}}}");
        let (ok, active, total, failed): (i64, i64, i64, i64) = self
            .store
            .eval_registered(
                &BULKHEAD_EXEC,
                &[key.as_str()],
                &[op.to_string(), max_concurrent.to_string(), now_unix().to_string()],
            )
            .await?;
        Ok((
            ok == 1,
            BulkheadStats {
                active_calls: active,
                total_calls: total,
                failed_calls: failed,
            },
        ))
    }

    pub async fn check(&self, name: &str, max_concurrent: u32) -> Result<bool> {
        Ok(self.op(name, "check", max_concurrent).await?.0)
    }

    pub async fn acquire(&self, name: &str, max_concurrent: u32) -> Result<bool> {
        Ok(self.op(name, "acquire", max_concurrent).await?.0)
    }

    pub async fn release(&self, name: &str, max_concurrent: u32) -> Result<()> {
        self.op(name, "release", max_concurrent).await?;
        Ok(())
    }

    pub async fn success(&self, name: &str, max_concurrent: u32) -> Result<()> {
        self.op(name, "success", max_concurrent).await?;
        Ok(())
    }

    pub async fn failure(&self, name: &str, max_concurrent: u32) -> Result<()> {
        self.op(name, "failure", max_concurrent).await?;
        Ok(())
    }

    pub async fn stats(&self, name: &str, max_concurrent: u32) -> Result<BulkheadStats> {
        Ok(self.op(name, "check", max_concurrent).await?.1)
    }

    /// `acquire` → run body → `success`/`failure` → `release`, each step
    /// exception-isolated per §4.4.3.
    pub async fn guard<F, Fut, T, E>(
        &self,
        name: &str,
        max_concurrent: u32,
        body: F,
    ) -> Result<Option<std::result::Result<T, E>>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
    {
        if !self.acquire(name, max_concurrent).await? {
            return Ok(None);
        }
        let outcome = body().await;
        match &outcome {
            Ok(_) => {
                let _ = self.success(name, max_concurrent).await;
            }
            Err(_) => {
                let _ = self.failure(name, max_concurrent).await;
            }
        }
        let _ = self.release(name, max_concurrent).await;
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_fields_are_nonnegative_by_construction() {
        let stats = BulkheadStats {
            active_calls: 0,
            total_calls: 0,
            failed_calls: 0,
        };
        assert_eq!(stats.active_calls, 0);
    }
}
