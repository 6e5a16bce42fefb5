//! Autoscaling configuration — policy bounds, hysteresis delays, control plane

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServingError};

/// Autoscaling policy for the replica group
///
/// All fields are supplied configuration, never derived. The controller
/// samples ongoing-request counts every `metrics_interval_secs`, averages
/// them over `look_back_period_secs`, and only acts once the average has
/// stayed on one side of `target_ongoing_per_replica` for the corresponding
/// delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalingConfig {
    /// Whether the autoscaling controller runs on this replica (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Minimum replicas in the group (default: 1)
    #[serde(default = "default_min_replicas")]
    pub min_replicas: u32,

    /// Maximum replicas in the group (default: 4)
    #[serde(default = "default_max_replicas")]
    pub max_replicas: u32,

    /// Target windowed average of ongoing requests per replica (default: 20)
    #[serde(default = "default_target_ongoing")]
    pub target_ongoing_per_replica: f64,

    /// Seconds the average must stay above target before scaling up (default: 30)
    #[serde(default = "default_upscale_delay")]
    pub upscale_delay_secs: u64,

    /// Seconds the average must stay below target before scaling down (default: 600)
    #[serde(default = "default_downscale_delay")]
    pub downscale_delay_secs: u64,

    /// Seconds between metric samples (default: 10)
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Sliding window length for metric retention (default: 30)
    #[serde(default = "default_look_back_period")]
    pub look_back_period_secs: u64,

    /// Control-plane base URL for group metrics and scale actuation
    /// (required when enabled)
    #[serde(default)]
    pub control_plane_url: String,

    /// Replica group name used in control-plane calls (default: "serving")
    #[serde(default = "default_group")]
    pub group: String,

    /// Scale executor type: "http" (default) or "k8s"
    #[serde(default = "default_executor")]
    pub executor: String,
}

impl AutoscalingConfig {
    /// Validate autoscaling settings
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.min_replicas == 0 {
            return Err(ServingError::Config(
                "autoscaling.min_replicas must be at least 1".to_string(),
            ));
        }
        if self.max_replicas < self.min_replicas {
            return Err(ServingError::Config(format!(
                "autoscaling.max_replicas {} is below min_replicas {}",
                self.max_replicas, self.min_replicas
            )));
        }
        if self.target_ongoing_per_replica <= 0.0 {
            return Err(ServingError::Config(
                "autoscaling.target_ongoing_per_replica must be positive".to_string(),
            ));
        }
        if self.metrics_interval_secs == 0 {
            return Err(ServingError::Config(
                "autoscaling.metrics_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.look_back_period_secs < self.metrics_interval_secs {
            return Err(ServingError::Config(format!(
                "autoscaling.look_back_period_secs {} is shorter than metrics_interval_secs {}",
                self.look_back_period_secs, self.metrics_interval_secs
            )));
        }
        if self.control_plane_url.is_empty() {
            return Err(ServingError::Config(
                "autoscaling.control_plane_url is required when autoscaling is enabled"
                    .to_string(),
            ));
        }
        if self.group.is_empty() {
            return Err(ServingError::Config(
                "autoscaling.group must not be empty".to_string(),
            ));
        }
        match self.executor.as_str() {
            "http" | "k8s" => Ok(()),
            other => Err(ServingError::Config(format!(
                "autoscaling.executor '{}' is not one of: http, k8s",
                other
            ))),
        }
    }
}

impl Default for AutoscalingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_replicas: default_min_replicas(),
            max_replicas: default_max_replicas(),
            target_ongoing_per_replica: default_target_ongoing(),
            upscale_delay_secs: default_upscale_delay(),
            downscale_delay_secs: default_downscale_delay(),
            metrics_interval_secs: default_metrics_interval(),
            look_back_period_secs: default_look_back_period(),
            control_plane_url: String::new(),
            group: default_group(),
            executor: default_executor(),
        }
    }
}

fn default_min_replicas() -> u32 {
    1
}

fn default_max_replicas() -> u32 {
    4
}

fn default_target_ongoing() -> f64 {
    20.0
}

fn default_upscale_delay() -> u64 {
    30
}

fn default_downscale_delay() -> u64 {
    600
}

fn default_metrics_interval() -> u64 {
    10
}

fn default_look_back_period() -> u64 {
    30
}

fn default_group() -> String {
    "serving".to_string()
}

fn default_executor() -> String {
    "http".to_string()
}
