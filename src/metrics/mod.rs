//! Metrics aggregation and monitoring (§4.8–4.10)

pub mod aggregator;
pub mod backends;
pub mod monitor;

pub use aggregator::{spawn_aggregation_loop, MetricsAggregator, PerformanceMetrics, REQUIRED_METRICS};
pub use backends::{Alert, AlertLevel, MetricPoint, MetricStats, MonitorBackend};
pub use monitor::{status_for, HealthStatus, OverallHealth, PermissionMonitor, RecordType};
