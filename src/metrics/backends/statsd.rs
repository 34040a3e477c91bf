//! Statsd UDP backend — write-only (§4.9)
//!
//! No statsd client crate is part of this pack's dependency surface, so the
//! wire format (plain-text `name:value|type` datagrams, fire-and-forget) is
//! implemented directly against `tokio::net::UdpSocket`, the same way the
//! rest of this crate reaches for the lowest-level primitive when no
//! teacher/pack crate already covers the concern.

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::warn;

use super::{Alert, AlertLevel, MetricPoint, MetricStats, MonitorBackend};
use crate::error::Result;

pub struct StatsdBackend {
    socket: UdpSocket,
    target: String,
    prefix: String,
}

impl StatsdBackend {
    pub async fn connect(host: &str, port: u16, prefix: impl Into<String>) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| crate::error::Error::StoreUnavailable(e.to_string()))?;
        Ok(Self {
            socket,
            target: format!("{host}:{port}"),
            prefix: prefix.into(),
        })
    }

    async fn send(&self, line: &str) {
        if let Err(e) = self.socket.send_to(line.as_bytes(), &self.target).await {
            warn!(error = %e, "statsd datagram send failed");
        }
    }
}

#[async_trait]
impl MonitorBackend for StatsdBackend {
    async fn record_metric(&self, name: &str, value: f64, _tags: Option<serde_json::Value>) -> Result<()> {
        self.send(&format!("{}.{name}:{value}|g", self.prefix)).await;
        Ok(())
    }

    async fn record_event(&self, name: &str, _meta: Option<serde_json::Value>, _tags: Option<serde_json::Value>) -> Result<()> {
        self.send(&format!("{}.event.{name}:1|c", self.prefix)).await;
        Ok(())
    }

    async fn get_metrics(&self, _name: &str, _limit: usize) -> Result<Vec<MetricPoint>> {
        Ok(Vec::new())
    }

    async fn get_stats(&self, _name: &str) -> Result<MetricStats> {
        Ok(MetricStats::default())
    }

    async fn create_alert(&self, metric_type: &str, level: AlertLevel, message: &str) -> Result<Alert> {
        self.send(&format!("{}.alert.{metric_type}.{}:1|c", self.prefix, level.as_str()))
            .await;
        Ok(Alert {
            id: String::new(),
            metric_type: metric_type.to_string(),
            level,
            message: message.to_string(),
            resolved: false,
            created_at: 0.0,
        })
    }

    async fn get_active_alerts(&self) -> Result<Vec<Alert>> {
        Ok(Vec::new())
    }

    async fn resolve_alert(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn get_alert_counters(&self) -> Result<std::collections::HashMap<String, u64>> {
        Ok(std::collections::HashMap::new())
    }
}
