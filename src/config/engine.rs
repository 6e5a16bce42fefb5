//! Engine configuration — model identity, sidecar endpoint, and GPU sizing

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServingError};

/// Inference engine sidecar configuration
///
/// The engine runs as a separate GPU-bound process; this replica reaches it
/// over HTTP at `endpoint`. `model_id` and the GPU sizing fields are passed
/// to the sidecar during initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model to serve (required, e.g. "facebook/opt-6.7b")
    #[serde(default)]
    pub model_id: String,

    /// Base URL of the engine sidecar (default: http://127.0.0.1:8500)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Number of GPUs the engine shards the model across (default: 1)
    #[serde(default = "default_tensor_parallel_size")]
    pub tensor_parallel_size: u32,

    /// Fraction of GPU memory the engine may claim (default: 0.90)
    #[serde(default = "default_gpu_memory_utilization")]
    pub gpu_memory_utilization: f64,

    /// Backpressure watermark: maximum concurrent generations the proxy
    /// admits before rejecting with 503 (default: 64)
    #[serde(default = "default_max_ongoing_requests")]
    pub max_ongoing_requests: usize,
}

impl EngineConfig {
    /// Validate engine settings
    pub fn validate(&self) -> Result<()> {
        if self.model_id.is_empty() {
            return Err(ServingError::Config(
                "engine.model_id is required".to_string(),
            ));
        }
        if self.endpoint.is_empty() {
            return Err(ServingError::Config(
                "engine.endpoint is required".to_string(),
            ));
        }
        if self.tensor_parallel_size == 0 {
            return Err(ServingError::Config(
                "engine.tensor_parallel_size must be at least 1".to_string(),
            ));
        }
        if self.gpu_memory_utilization <= 0.0 || self.gpu_memory_utilization > 1.0 {
            return Err(ServingError::Config(format!(
                "engine.gpu_memory_utilization must be in (0.0, 1.0], got {}",
                self.gpu_memory_utilization
            )));
        }
        if self.max_ongoing_requests == 0 {
            return Err(ServingError::Config(
                "engine.max_ongoing_requests must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_id: String::new(),
            endpoint: default_endpoint(),
            tensor_parallel_size: default_tensor_parallel_size(),
            gpu_memory_utilization: default_gpu_memory_utilization(),
            max_ongoing_requests: default_max_ongoing_requests(),
        }
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_tensor_parallel_size() -> u32 {
    1
}

fn default_gpu_memory_utilization() -> f64 {
    0.90
}

fn default_max_ongoing_requests() -> usize {
    64
}
