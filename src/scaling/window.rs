//! Sliding metric windows — per-replica load samples with time-based eviction

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One load sample from one replica
#[derive(Debug, Clone)]
pub struct ReplicaMetric {
    /// Identity of the reporting replica
    pub replica_id: u32,
    /// In-flight generation requests at sampling time
    pub ongoing_request_count: usize,
    /// When the sample was taken
    pub sampled_at: Instant,
}

/// Sliding window of samples for a single replica.
///
/// Samples older than the look-back period are evicted; the windowed mean is
/// the replica's contribution to the group load average.
#[derive(Debug)]
pub struct MetricsWindow {
    /// Retention period
    look_back: Duration,
    /// Samples in arrival order (oldest first)
    samples: VecDeque<ReplicaMetric>,
}

impl MetricsWindow {
    /// Create an empty window with the given look-back period
    pub fn new(look_back: Duration) -> Self {
        Self {
            look_back,
            samples: VecDeque::new(),
        }
    }

    /// Append a sample
    pub fn record(&mut self, sample: ReplicaMetric) {
        self.samples.push_back(sample);
    }

    /// Evict samples older than the look-back period relative to `now`
    pub fn evict(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.sampled_at) > self.look_back {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Windowed mean of ongoing-request counts; `None` when empty
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: usize = self.samples.iter().map(|s| s.ongoing_request_count).sum();
        Some(sum as f64 / self.samples.len() as f64)
    }

    /// Number of retained samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window holds no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
