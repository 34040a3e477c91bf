//! Distributed permission evaluation and caching core.
//!
//! See [`lifecycle::System`] for the composition root and [`facade::Facade`]
//! for the surface callers actually drive day to day.

pub mod abac;
pub mod agents;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod facade;
pub mod invalidation;
pub mod lifecycle;
pub mod lock;
pub mod metrics;
pub mod ml;
pub mod observability;
pub mod primitives;
pub mod querier;
pub mod resilience;
pub mod store;

/// The commonly-imported surface: start/stop the system, drive the façade,
/// and handle its errors.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::facade::{AbacContext, Facade, SystemStats};
    pub use crate::lifecycle::System;
    pub use crate::primitives::ScopeType;
}
