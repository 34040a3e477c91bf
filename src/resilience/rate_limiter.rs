//! Rate limiter: token bucket / sliding window / fixed window / multi-dimensional (§4.4.2)

use crate::error::Result;
use crate::store::scripts::{
    RATE_LIMIT_FIXED_WINDOW, RATE_LIMIT_MULTI_DIM, RATE_LIMIT_SLIDING_WINDOW,
    RATE_LIMIT_TOKEN_BUCKET,
};
use crate::store::StoreClient;

use super::now_unix;

pub struct RateLimiter {
    store: StoreClient,
}

impl RateLimiter {
    pub fn new(store: StoreClient) -> Self {
        Self { store }
    }

    pub async fn token_bucket(
        &self,
        name: &str,
        subkey: &str,
        max_requests: u32,
        tokens_per_second: u32,
    ) -> Result<bool> {
        let key = format!("rate_limiter:{{{name}}}");
        let (allowed,): (i64,) = self
            .store
            .eval_registered(
                &RATE_LIMIT_TOKEN_BUCKET,
                &[key.as_str()],
                &[
                    subkey.to_string(),
                    max_requests.to_string(),
                    tokens_per_second.to_string(),
                    now_unix().to_string(),
                ],
            )
            .await?;
        Ok(allowed == 1)
    }

    pub async fn sliding_window(
        &self,
        name: &str,
        subkey: &str,
        max_requests: u32,
        window_s: u64,
    ) -> Result<bool> {
        let key = format!("rate_limiter:{{{name}}}");
        let (allowed,): (i64,) = self
            .store
            .eval_registered(
                &RATE_LIMIT_SLIDING_WINDOW,
                &[key.as_str()],
                &[
                    subkey.to_string(),
                    max_requests.to_string(),
                    window_s.to_string(),
                    now_unix().to_string(),
                ],
            )
            .await?;
        Ok(allowed == 1)
    }

    pub async fn fixed_window(
        &self,
        name: &str,
        subkey: &str,
        max_requests: u32,
        window_s: u64,
    ) -> Result<bool> {
        let key = format!("rate_limiter:{{{name}}}");
        let (allowed,): (i64,) = self
            .store
            .eval_registered(
                &RATE_LIMIT_FIXED_WINDOW,
                &[key.as_str()],
                &[
                    subkey.to_string(),
                    max_requests.to_string(),
                    window_s.to_string(),
                    now_unix().to_string(),
                ],
            )
            .await?;
        Ok(allowed == 1)
    }

    /// A dimension evaluated as an independent sliding-window check in a
    /// multi-dimensional decision (§4.4.2).
    pub async fn check_dimension(
        &self,
        name: &str,
        subkey: &str,
        max_requests: u32,
        window_s: u64,
    ) -> Result<bool> {
        self.sliding_window(name, subkey, max_requests, window_s).await
    }

    /// Evaluates every enabled dimension as an independent sliding-window
    /// check and rejects if **any** dimension rejects (§8: "Multi-dim
    /// limiter rejects if any enabled dimension rejects").
    ///
    /// Backed by `RATE_LIMIT_MULTI_DIM`, a single atomic script that reads
    /// every dimension's `ZCARD` before recording a member against any of
    /// them — the fix for the over-count bug the source exhibited, where a
    /// rejection on a later dimension still left an entry recorded against
    /// an earlier one that had already passed.
    pub async fn check_multi_dimensional(
        &self,
        name: &str,
        dimensions: &[(&str, u32, u64)],
    ) -> Result<bool> {
        let key = format!("rate_limiter:{{{name}}}");
        let keys: Vec<String> = (0..dimensions.len())
            .map(|i| format!("{key}:dim{i}"))
            .collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();

        let now = now_unix();
        let mut args = vec![now.to_string(), dimensions.len().to_string()];
        for (subkey, max_requests, window_s) in dimensions {
            args.push(subkey.to_string());
            args.push(max_requests.to_string());
            args.push(window_s.to_string());
        }

        let (allowed,): (i64,) = self
            .store
            .eval_registered(&RATE_LIMIT_MULTI_DIM, &key_refs, &args)
            .await?;
        Ok(allowed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_tuple_shape() {
        let dims: &[(&str, u32, u64)] = &[("user:u1", 100, 60), ("server:s1", 1000, 60)];
        assert_eq!(dims.len(), 2);
    }
}
