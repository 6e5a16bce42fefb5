//! Autoscaler — hysteretic decision engine driven by ongoing-request load
//!
//! The group load average is compared against `target_ongoing_per_replica`.
//! A scale decision fires only after the average stays on one side of the
//! target for the configured delay, one replica step at a time, clamped to
//! `[min_replicas, max_replicas]`.

use crate::config::AutoscalingConfig;
use crate::scaling::executor::{ScaleDecision, ScaleDirection};
use crate::scaling::window::{MetricsWindow, ReplicaMetric};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Hysteretic replica autoscaler.
///
/// Holds one sliding window per replica. Each evaluation evicts stale
/// samples, averages the per-replica means into a group load figure, and
/// tracks how long that figure has been above or below target before
/// recommending a single-step change.
pub struct ReplicaAutoscaler {
    /// Scaling policy
    policy: AutoscalingConfig,
    /// Per-replica metric windows
    windows: HashMap<u32, MetricsWindow>,
    /// Current known replica count
    current_replicas: u32,
    /// When the group average first rose above target, if it is above
    above_target_since: Option<Instant>,
    /// When the group average first fell below target, if it is below
    below_target_since: Option<Instant>,
}

impl ReplicaAutoscaler {
    /// Create an autoscaler starting from the policy's minimum replica count
    pub fn new(policy: AutoscalingConfig) -> Self {
        let current_replicas = policy.min_replicas;
        Self {
            policy,
            windows: HashMap::new(),
            current_replicas,
            above_target_since: None,
            below_target_since: None,
        }
    }

    /// Record a load sample into the owning replica's window
    pub fn record(&mut self, sample: ReplicaMetric) {
        let look_back = Duration::from_secs(self.policy.look_back_period_secs);
        self.windows
            .entry(sample.replica_id)
            .or_insert_with(|| MetricsWindow::new(look_back))
            .record(sample);
    }

    /// Evaluate the group load at `now` and return a scale decision if one
    /// is due.
    ///
    /// Decisions are advisory; the caller is expected to push the actuated
    /// replica count back via [`set_current_replicas`](Self::set_current_replicas).
    pub fn evaluate(&mut self, now: Instant) -> Option<ScaleDecision> {
        for window in self.windows.values_mut() {
            window.evict(now);
        }
        self.windows.retain(|_, window| !window.is_empty());

        let Some(average) = self.group_average() else {
            // No fresh samples: forget any pending trend.
            self.above_target_since = None;
            self.below_target_since = None;
            return None;
        };

        let target = self.policy.target_ongoing_per_replica;
        if average > target {
            self.below_target_since = None;
            let since = *self.above_target_since.get_or_insert(now);
            let sustained = now.duration_since(since);
            if sustained >= Duration::from_secs(self.policy.upscale_delay_secs) {
                let desired = (self.current_replicas + 1).min(self.policy.max_replicas);
                if desired == self.current_replicas {
                    return None;
                }
                let decision = ScaleDecision {
                    group: self.policy.group.clone(),
                    direction: ScaleDirection::Up,
                    current_replicas: self.current_replicas,
                    desired_replicas: desired,
                    reason: format!(
                        "group average {:.1} above target {:.1} for {}s",
                        average,
                        target,
                        sustained.as_secs()
                    ),
                };
                self.above_target_since = None;
                self.current_replicas = desired;
                return Some(decision);
            }
        } else if average < target {
            self.above_target_since = None;
            let since = *self.below_target_since.get_or_insert(now);
            let sustained = now.duration_since(since);
            if sustained >= Duration::from_secs(self.policy.downscale_delay_secs) {
                let desired = self
                    .current_replicas
                    .saturating_sub(1)
                    .max(self.policy.min_replicas);
                if desired == self.current_replicas {
                    return None;
                }
                let decision = ScaleDecision {
                    group: self.policy.group.clone(),
                    direction: ScaleDirection::Down,
                    current_replicas: self.current_replicas,
                    desired_replicas: desired,
                    reason: format!(
                        "group average {:.1} below target {:.1} for {}s",
                        average,
                        target,
                        sustained.as_secs()
                    ),
                };
                self.below_target_since = None;
                self.current_replicas = desired;
                return Some(decision);
            }
        } else {
            self.above_target_since = None;
            self.below_target_since = None;
        }

        None
    }

    /// Mean of the per-replica window means; `None` when no window has samples
    pub fn group_average(&self) -> Option<f64> {
        let means: Vec<f64> = self.windows.values().filter_map(|w| w.mean()).collect();
        if means.is_empty() {
            return None;
        }
        Some(means.iter().sum::<f64>() / means.len() as f64)
    }

    /// Current known replica count
    pub fn current_replicas(&self) -> u32 {
        self.current_replicas
    }

    /// Overwrite the known replica count, e.g. after querying the actuator
    pub fn set_current_replicas(&mut self, replicas: u32) {
        self.current_replicas = replicas;
    }
}
