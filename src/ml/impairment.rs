//! System-impairment gate (§4.11.3)
//!
//! Subscribes to the resilience event bus and tracks a map of active
//! impairments keyed by `{event_name}:{name}`, mirroring
//! `original_source/.../permission_ml.py`'s `_handle_resilience_event` /
//! `is_system_impaired`. While any impairment is active, the ML monitor
//! drops incoming metrics rather than let transient resilience events
//! pollute the predictor and anomaly detector.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use tracing::{info, warn};

use crate::events::{EventBus, RESILIENCE_EVENTS_CHANNEL};
use crate::primitives::Event;

const DEFAULT_IMPAIRMENT_DURATION_S: f64 = 300.0;
const IMPAIRMENT_BUFFER_S: f64 = 15.0;

#[derive(Default)]
pub struct ImpairmentTracker {
    active: Mutex<HashMap<String, f64>>,
}

impl ImpairmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `tracker` to the resilience event channel. Returned
    /// subscription must be kept alive for the lifetime of the ML monitor.
    pub fn subscribe(self: &std::sync::Arc<Self>, events: &EventBus) -> crate::events::Subscription {
        let tracker = self.clone();
        events.subscribe(RESILIENCE_EVENTS_CHANNEL, move |event: Event| {
            tracker.handle_event(&event);
        })
    }

    fn handle_event(&self, event: &Event) {
        let event_name = event.event_name.as_str();
        let name = event.payload.get("name").and_then(|v| v.as_str()).unwrap_or("unknown");
        let key = format!("{event_name}:{name}");

        if event_name.contains("opened") || event_name.contains("activated") || event_name.contains("triggered") {
            let recovery_timeout = event
                .payload
                .get("recovery_timeout")
                .and_then(|v| v.as_f64())
                .unwrap_or(DEFAULT_IMPAIRMENT_DURATION_S);
            let expiry = now() + recovery_timeout + IMPAIRMENT_BUFFER_S;
            self.active.lock().unwrap().insert(key.clone(), expiry);
            warn!(impairment = key, expiry, "system impairment detected, ML module treating data cautiously");
        } else if event_name.contains("closed") || event_name.contains("deactivated") {
            if self.active.lock().unwrap().remove(&key).is_some() {
                info!(impairment = key, "system impairment resolved");
            }
        }
    }

    /// Clears expired entries and reports whether any impairment remains
    /// active.
    pub fn is_impaired(&self) -> bool {
        let mut active = self.active.lock().unwrap();
        let now = now();
        active.retain(|key, expiry| {
            let alive = now <= *expiry;
            if !alive {
                info!(impairment = key, "system impairment expired");
            }
            alive
        });
        !active.is_empty()
    }
}

fn now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str, payload: serde_json::Value) -> Event {
        Event {
            event_name: name.to_string(),
            timestamp: now(),
            source_module: "test".to_string(),
            hostname: "test".to_string(),
            pid: 1,
            payload,
        }
    }

    #[test]
    fn opened_then_closed_clears_impairment() {
        let tracker = ImpairmentTracker::new();
        tracker.handle_event(&event(
            "resilience.circuit_breaker.opened",
            json!({"name": "db_query", "recovery_timeout": 60.0}),
        ));
        assert!(tracker.is_impaired());
        tracker.handle_event(&event("resilience.circuit_breaker.closed", json!({"name": "db_query"})));
        assert!(!tracker.is_impaired());
    }

    #[test]
    fn unrecognized_event_name_is_ignored() {
        let tracker = ImpairmentTracker::new();
        tracker.handle_event(&event("resilience.circuit_breaker.half_open", json!({"name": "db_query"})));
        assert!(!tracker.is_impaired());
    }
}
