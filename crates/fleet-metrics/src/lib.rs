//! fleet-metrics — usage metering and metrics exposition.
//!
//! Converts uptime and allocation deltas into DCU usage increments and
//! publishes per-instance gauges and counters.
//!
//! # Architecture
//!
//! ```text
//! MeteringEngine
//!   ├── tick() ← RecurrentTask every 30 s
//!   │   ├── StateStore::list_instances()
//!   │   ├── UsageCache (previous tick per uid, evicted when gone)
//!   │   └── MetricsSink (status, age, usage, restarts)
//!   └── run() → periodic loop until shutdown
//!
//! MetricsRegistry (MetricsSink)
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod cache;
pub mod meter;
pub mod prometheus;
pub mod registry;

pub use cache::{UsageCache, UsageSnapshot};
pub use meter::{MeteringEngine, MeteringError, TickSummary, diff_minutes};
pub use prometheus::render_prometheus;
pub use registry::{InstanceLabels, MetricsRegistry, MetricsSink, MetricsSnapshot};
