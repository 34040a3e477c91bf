//! External ABAC policy engine client (§6, §B.3)
//!
//! Thin HTTP client over an Open-Policy-Agent-shaped deployment, grounded on
//! `original_source/.../opa_policy_manager.py`'s endpoint surface. Failures
//! of every kind are the caller's problem to fall back on — this client
//! never panics and always surfaces a typed [`Error`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::config::AbacConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct AbacInput {
    pub user: String,
    pub resource: String,
    pub action: String,
    pub context: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbacResult {
    pub allow: bool,
    #[serde(flatten)]
    pub extra: Value,
}

#[derive(Debug, Deserialize)]
struct AbacResponse {
    result: AbacResult,
}

/// §6: `PUT /v1/policies/{name}`, `POST /v1/data/{name}`, `GET
/// /v1/policies`, `DELETE /v1/policies/{name}`, `GET /health`.
pub struct AbacClient {
    http: reqwest::Client,
    base_url: String,
}

impl AbacClient {
    pub fn new(cfg: &AbacConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(Error::from)?;
        Ok(Self { http, base_url: cfg.base_url.trim_end_matches('/').to_string() })
    }

    /// `POST /v1/data/{name}` — the only endpoint the façade's `Check` path
    /// calls. A transport or decode failure is surfaced as
    /// `Error::UpstreamFailure`; the façade defaults to the RBAC result.
    pub async fn evaluate(&self, policy_name: &str, input: &AbacInput) -> Result<AbacResult> {
        let url = format!("{}/v1/data/{policy_name}", self.base_url);
        let body = serde_json::json!({ "input": input });
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Error::from)?;
        if !response.status().is_success() {
            return Err(Error::UpstreamFailure(format!(
                "abac policy evaluation returned {}",
                response.status()
            )));
        }
        let decoded: AbacResponse = response.json().await.map_err(Error::from)?;
        Ok(decoded.result)
    }

    pub async fn put_policy(&self, name: &str, rego_source: &str) -> Result<()> {
        let url = format!("{}/v1/policies/{name}", self.base_url);
        let response = self
            .http
            .put(&url)
            .header("content-type", "text/plain")
            .body(rego_source.to_string())
            .send()
            .await
            .map_err(Error::from)?;
        if !response.status().is_success() {
            return Err(Error::UpstreamFailure(format!("put_policy returned {}", response.status())));
        }
        Ok(())
    }

    pub async fn list_policies(&self) -> Result<Value> {
        let url = format!("{}/v1/policies", self.base_url);
        let response = self.http.get(&url).send().await.map_err(Error::from)?;
        response.json().await.map_err(Error::from)
    }

    pub async fn delete_policy(&self, name: &str) -> Result<()> {
        let url = format!("{}/v1/policies/{name}", self.base_url);
        let response = self.http.delete(&url).send().await.map_err(Error::from)?;
        if !response.status().is_success() {
            return Err(Error::UpstreamFailure(format!("delete_policy returned {}", response.status())));
        }
        Ok(())
    }

    /// `GET /health`. Never errors outward — a failed health probe is
    /// reported as `false`, logged once.
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, "abac health probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_default_timeout() {
        let cfg = AbacConfig::default();
        assert!(AbacClient::new(&cfg).is_ok());
    }
}
