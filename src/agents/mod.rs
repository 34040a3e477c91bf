//! Background coordination (§4.13, §5)
//!
//! Grounded on `acton-service/src/agents/*`, with the actor-hosted
//! messaging layer stripped out (see the grounding ledger's dependency-drop
//! note): the same task-tracking and health-aggregation shapes, driven by
//! plain async methods instead of `acton_reactive` envelopes.

pub mod background_worker;
pub mod health;

pub use background_worker::{BackgroundWorker, TaskStatus};
pub use health::{AggregatedHealthResponse, ComponentHealth, HealthMonitor, HealthStatus};
