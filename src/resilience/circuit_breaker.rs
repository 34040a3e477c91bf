//! Circuit breaker wrapper (§4.4.1)

use tracing::info;

use crate::error::Result;
use crate::events::{EventBus, RESILIENCE_EVENTS_CHANNEL};
use crate::primitives::{CircuitState, EventIntent};
use crate::store::StoreClient;

use super::now_unix;

/// One round trip through `circuit_breaker_exec`.
pub struct CircuitBreakerResult {
    pub can_execute: bool,
    pub state: CircuitState,
    pub event_intent: EventIntent,
}

/// Outcome of `guard`: either the body ran (successfully or not), or the
/// breaker was open and the body never ran.
pub enum GuardOutcome<T, E> {
    Ran(std::result::Result<T, E>),
    Open,
}

pub struct CircuitBreaker {
    store: StoreClient,
    events: EventBus,
}

impl CircuitBreaker {
    pub fn new(store: StoreClient, events: EventBus) -> Self {
        Self { store, events }
    }

    async fn exec(
        &self,
        name: &str,
        op: &str,
        failure_threshold: u32,
        recovery_timeout_s: u64,
    ) -> Result<CircuitBreakerResult> {
        let key = format!("circuit_breaker:{{{name}}}");
        let now = now_unix();
        let (can_execute, state, event): (i64, String, String) = self
            .store
            .eval_registered(
                &crate::store::scripts::CIRCUIT_BREAKER_EXEC,
                &[key.as_str()],
                &[
                    op.to_string(),
                    failure_threshold.to_string(),
                    recovery_timeout_s.to_string(),
                    now.to_string(),
                ],
            )
            .await?;

        let state = CircuitState::from_str(&state).unwrap_or(CircuitState::Closed);
        let event_intent = EventIntent::from_str(&event).unwrap_or(EventIntent::NoEvent);

        if event_intent != EventIntent::NoEvent {
            let event_name =
                format!("resilience.circuit_breaker.{}", transition_suffix(event_intent));
            info!(name = %key, state = state.as_str(), "circuit breaker transitioned");
            self.events
                .publish(
                    RESILIENCE_EVENTS_CHANNEL,
                    &event_name,
                    serde_json::json!({ "name": key, "state": state.as_str() }),
                )
                .await?;
        }

        Ok(CircuitBreakerResult {
            can_execute: can_execute == 1,
            state,
            event_intent,
        })
    }

    pub async fn check(
        &self,
        name: &str,
        failure_threshold: u32,
        recovery_timeout_s: u64,
    ) -> Result<CircuitBreakerResult> {
        self.exec(name, "check", failure_threshold, recovery_timeout_s).await
    }

    pub async fn success(
        &self,
        name: &str,
        failure_threshold: u32,
        recovery_timeout_s: u64,
    ) -> Result<CircuitBreakerResult> {
        self.exec(name, "success", failure_threshold, recovery_timeout_s).await
    }

    pub async fn failure(
        &self,
        name: &str,
        failure_threshold: u32,
        recovery_timeout_s: u64,
    ) -> Result<CircuitBreakerResult> {
        self.exec(name, "failure", failure_threshold, recovery_timeout_s).await
    }

    /// Runs `body` guarded by the breaker: `check` first (short-circuits if
    /// open), then `success`/`failure` around the call. Event publication
    /// failures never affect the business result.
    pub async fn guard<F, Fut, T, E>(
        &self,
        name: &str,
        failure_threshold: u32,
        recovery_timeout_s: u64,
        body: F,
    ) -> Result<GuardOutcome<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
    {
        let gate = self.check(name, failure_threshold, recovery_timeout_s).await?;
        if !gate.can_execute {
            return Ok(GuardOutcome::Open);
        }
        match body().await {
            Ok(v) => {
                self.success(name, failure_threshold, recovery_timeout_s).await?;
                Ok(GuardOutcome::Ran(Ok(v)))
            }
            Err(e) => {
                self.failure(name, failure_threshold, recovery_timeout_s).await?;
                Ok(GuardOutcome::Ran(Err(e)))
            }
        }
    }
}

fn transition_suffix(intent: EventIntent) -> &'static str {
    match intent {
        EventIntent::StateChangedToOpen => "opened",
        EventIntent::StateChangedToHalfOpen => "half_opened",
        EventIntent::StateChangedToClosed => "closed",
        EventIntent::NoEvent => "no_event",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_suffixes() {
        assert_eq!(transition_suffix(EventIntent::StateChangedToOpen), "opened");
        assert_eq!(
            transition_suffix(EventIntent::StateChangedToHalfOpen),
            "half_opened"
        );
        assert_eq!(transition_suffix(EventIntent::StateChangedToClosed), "closed");
    }
}
