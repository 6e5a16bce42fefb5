//! Observability — request-lifecycle metrics
//!
//! Provides in-process counters and gauges with JSON snapshots and
//! Prometheus-compatible text rendering.

pub mod metrics;

pub use metrics::{MetricsSnapshot, ServingMetrics};
