//! Shared-store client (§4.1)

mod client;
pub mod scripts;

pub use client::{HealthState, ScanMatch, StoreClient};
