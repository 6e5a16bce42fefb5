//! Serving metrics — lightweight counters and gauges
//!
//! Provides in-process metrics tracking without external dependencies.
//! Metrics can be exported as JSON or rendered as Prometheus text format.
//! The ongoing-request gauge kept here is the load signal the autoscaling
//! controller samples.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Metrics snapshot — a point-in-time view of all metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Requests admitted since start
    pub admitted_total: u64,
    /// Requests rejected at admission (validation failures)
    pub rejected_total: u64,
    /// Requests whose context_length was clamped to the configured default
    pub clamped_total: u64,
    /// Submissions rejected at the backpressure watermark
    pub overloaded_total: u64,
    /// Generations that reached natural completion
    pub completed_total: u64,
    /// Generations aborted before completion
    pub aborted_total: u64,
    /// Generations that failed inside the engine
    pub failed_total: u64,
    /// Client disconnects observed mid-generation
    pub client_disconnects_total: u64,
    /// Token chunks emitted across all requests
    pub chunks_emitted_total: u64,
    /// Generated characters emitted across all requests
    pub generated_chars_total: u64,
    /// Currently in-flight generation requests
    pub ongoing_requests: i64,
}

/// Serving metrics collector
pub struct ServingMetrics {
    admitted_total: AtomicU64,
    rejected_total: AtomicU64,
    clamped_total: AtomicU64,
    overloaded_total: AtomicU64,
    completed_total: AtomicU64,
    aborted_total: AtomicU64,
    failed_total: AtomicU64,
    client_disconnects_total: AtomicU64,
    chunks_emitted_total: AtomicU64,
    generated_chars_total: AtomicU64,
    ongoing_requests: AtomicI64,
}

impl ServingMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            admitted_total: AtomicU64::new(0),
            rejected_total: AtomicU64::new(0),
            clamped_total: AtomicU64::new(0),
            overloaded_total: AtomicU64::new(0),
            completed_total: AtomicU64::new(0),
            aborted_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
            client_disconnects_total: AtomicU64::new(0),
            chunks_emitted_total: AtomicU64::new(0),
            generated_chars_total: AtomicU64::new(0),
            ongoing_requests: AtomicI64::new(0),
        }
    }

    /// Record a request admitted into the lifecycle
    pub fn record_admitted(&self) {
        self.admitted_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request rejected at admission
    pub fn record_rejected(&self) {
        self.rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a context-length clamp
    pub fn record_clamped(&self) {
        self.clamped_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a watermark rejection
    pub fn record_overloaded(&self) {
        self.overloaded_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a generation that completed naturally
    pub fn record_completed(&self) {
        self.completed_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an aborted generation
    pub fn record_aborted(&self) {
        self.aborted_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a generation that failed inside the engine
    pub fn record_failed(&self) {
        self.failed_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a client disconnect observed mid-generation
    pub fn record_client_disconnect(&self) {
        self.client_disconnects_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one emitted token chunk and its delta length
    pub fn record_chunk(&self, delta_chars: usize) {
        self.chunks_emitted_total.fetch_add(1, Ordering::Relaxed);
        self.generated_chars_total
            .fetch_add(delta_chars as u64, Ordering::Relaxed);
    }

    /// Increment the in-flight gauge
    pub fn inc_ongoing(&self) {
        self.ongoing_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement the in-flight gauge
    pub fn dec_ongoing(&self) {
        self.ongoing_requests.fetch_sub(1, Ordering::Relaxed);
    }

    /// Point-in-time count of in-flight generation requests
    pub fn ongoing_requests(&self) -> usize {
        self.ongoing_requests.load(Ordering::Relaxed).max(0) as usize
    }

    /// Total requests admitted since start
    pub fn admitted_requests(&self) -> u64 {
        self.admitted_total.load(Ordering::Relaxed)
    }

    /// Take a point-in-time snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admitted_total: self.admitted_total.load(Ordering::Relaxed),
            rejected_total: self.rejected_total.load(Ordering::Relaxed),
            clamped_total: self.clamped_total.load(Ordering::Relaxed),
            overloaded_total: self.overloaded_total.load(Ordering::Relaxed),
            completed_total: self.completed_total.load(Ordering::Relaxed),
            aborted_total: self.aborted_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
            client_disconnects_total: self.client_disconnects_total.load(Ordering::Relaxed),
            chunks_emitted_total: self.chunks_emitted_total.load(Ordering::Relaxed),
            generated_chars_total: self.generated_chars_total.load(Ordering::Relaxed),
            ongoing_requests: self.ongoing_requests.load(Ordering::Relaxed),
        }
    }

    /// Render all metrics in Prometheus text exposition format
    pub fn render_prometheus(&self) -> String {
        let snap = self.snapshot();
        let mut output = String::new();

        output.push_str("# HELP serving_requests_admitted_total Requests admitted\n");
        output.push_str("# TYPE serving_requests_admitted_total counter\n");
        output.push_str(&format!(
            "serving_requests_admitted_total {}\n",
            snap.admitted_total
        ));

        output.push_str("# HELP serving_requests_rejected_total Requests rejected at admission\n");
        output.push_str("# TYPE serving_requests_rejected_total counter\n");
        output.push_str(&format!(
            "serving_requests_rejected_total {}\n",
            snap.rejected_total
        ));

        output.push_str(
            "# HELP serving_context_length_clamped_total Context lengths clamped to the default\n",
        );
        output.push_str("# TYPE serving_context_length_clamped_total counter\n");
        output.push_str(&format!(
            "serving_context_length_clamped_total {}\n",
            snap.clamped_total
        ));

        output.push_str(
            "# HELP serving_requests_overloaded_total Submissions rejected at the watermark\n",
        );
        output.push_str("# TYPE serving_requests_overloaded_total counter\n");
        output.push_str(&format!(
            "serving_requests_overloaded_total {}\n",
            snap.overloaded_total
        ));

        output.push_str("# HELP serving_generations_total Finished generations by outcome\n");
        output.push_str("# TYPE serving_generations_total counter\n");
        for (outcome, count) in [
            ("completed", snap.completed_total),
            ("aborted", snap.aborted_total),
            ("failed", snap.failed_total),
        ] {
            output.push_str(&format!(
                "serving_generations_total{{outcome=\"{}\"}} {}\n",
                outcome, count
            ));
        }

        output.push_str("# HELP serving_client_disconnects_total Client disconnects observed\n");
        output.push_str("# TYPE serving_client_disconnects_total counter\n");
        output.push_str(&format!(
            "serving_client_disconnects_total {}\n",
            snap.client_disconnects_total
        ));

        output.push_str("# HELP serving_chunks_emitted_total Token chunks emitted\n");
        output.push_str("# TYPE serving_chunks_emitted_total counter\n");
        output.push_str(&format!(
            "serving_chunks_emitted_total {}\n",
            snap.chunks_emitted_total
        ));

        output.push_str("# HELP serving_generated_chars_total Generated characters emitted\n");
        output.push_str("# TYPE serving_generated_chars_total counter\n");
        output.push_str(&format!(
            "serving_generated_chars_total {}\n",
            snap.generated_chars_total
        ));

        output.push_str("# HELP serving_ongoing_requests In-flight generation requests\n");
        output.push_str("# TYPE serving_ongoing_requests gauge\n");
        output.push_str(&format!(
            "serving_ongoing_requests {}\n",
            snap.ongoing_requests
        ));

        output
    }
}

impl Default for ServingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- counters ---

    #[test]
    fn test_admission_counters() {
        let m = ServingMetrics::new();
        m.record_admitted();
        m.record_admitted();
        m.record_rejected();
        m.record_clamped();

        let snap = m.snapshot();
        assert_eq!(snap.admitted_total, 2);
        assert_eq!(snap.rejected_total, 1);
        assert_eq!(snap.clamped_total, 1);
        assert_eq!(m.admitted_requests(), 2);
    }

    #[test]
    fn test_outcome_counters() {
        let m = ServingMetrics::new();
        m.record_completed();
        m.record_completed();
        m.record_aborted();
        m.record_failed();
        m.record_client_disconnect();

        let snap = m.snapshot();
        assert_eq!(snap.completed_total, 2);
        assert_eq!(snap.aborted_total, 1);
        assert_eq!(snap.failed_total, 1);
        assert_eq!(snap.client_disconnects_total, 1);
    }

    #[test]
    fn test_chunk_accounting() {
        let m = ServingMetrics::new();
        m.record_chunk(5);
        m.record_chunk(7);

        let snap = m.snapshot();
        assert_eq!(snap.chunks_emitted_total, 2);
        assert_eq!(snap.generated_chars_total, 12);
    }

    // --- gauge ---

    #[test]
    fn test_ongoing_gauge() {
        let m = ServingMetrics::new();
        assert_eq!(m.ongoing_requests(), 0);

        m.inc_ongoing();
        m.inc_ongoing();
        assert_eq!(m.ongoing_requests(), 2);

        m.dec_ongoing();
        assert_eq!(m.ongoing_requests(), 1);
    }

    #[test]
    fn test_ongoing_gauge_never_negative() {
        let m = ServingMetrics::new();
        m.dec_ongoing();
        assert_eq!(m.ongoing_requests(), 0);
    }

    // --- snapshot ---

    #[test]
    fn test_snapshot_serialization() {
        let m = ServingMetrics::new();
        m.record_admitted();
        m.inc_ongoing();

        let json = serde_json::to_string(&m.snapshot()).unwrap();
        let parsed: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.admitted_total, 1);
        assert_eq!(parsed.ongoing_requests, 1);
    }

    // --- prometheus ---

    #[test]
    fn test_prometheus_format() {
        let m = ServingMetrics::new();
        m.record_admitted();
        m.record_overloaded();
        m.record_completed();
        m.record_aborted();
        m.inc_ongoing();

        let output = m.render_prometheus();
        assert!(output.contains("serving_requests_admitted_total 1"));
        assert!(output.contains("serving_requests_overloaded_total 1"));
        assert!(output.contains("serving_generations_total{outcome=\"completed\"} 1"));
        assert!(output.contains("serving_generations_total{outcome=\"aborted\"} 1"));
        assert!(output.contains("serving_generations_total{outcome=\"failed\"} 0"));
        assert!(output.contains("serving_ongoing_requests 1"));
    }

    #[test]
    fn test_prometheus_help_and_type_lines() {
        let m = ServingMetrics::new();
        let output = m.render_prometheus();
        assert!(output.contains("# HELP serving_requests_admitted_total"));
        assert!(output.contains("# TYPE serving_ongoing_requests gauge"));
    }

    #[test]
    fn test_default_is_zeroed() {
        let snap = ServingMetrics::default().snapshot();
        assert_eq!(snap.admitted_total, 0);
        assert_eq!(snap.ongoing_requests, 0);
    }
}
