//! Configuration types for A3S Serving
//!
//! Defines the configuration model for a serving replica:
//! server → engine → admission → autoscaling.
//! Uses HCL (HashiCorp Configuration Language) as the configuration format.

mod admission;
mod autoscaling;
mod engine;

pub use admission::AdmissionConfig;
pub use autoscaling::AutoscalingConfig;
pub use engine::EngineConfig;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, ServingError};

/// Top-level serving configuration
///
/// Uses HCL (HashiCorp Configuration Language) format.
///
/// # HCL Example
///
/// ```hcl
/// server {
///   listen_addr = "0.0.0.0:8000"
///   replica_id  = 0
/// }
///
/// engine {
///   model_id = "facebook/opt-6.7b"
///   endpoint = "http://127.0.0.1:8500"
/// }
///
/// admission {
///   allowed_context_lengths = [8192, 32768]
///   default_context_length  = 8192
/// }
///
/// autoscaling {
///   enabled           = true
///   control_plane_url = "http://127.0.0.1:9090"
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServingConfig {
    /// HTTP server settings for this replica
    #[serde(default)]
    pub server: ServerConfig,

    /// Inference engine sidecar settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Request admission policy
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Autoscaling policy and control-plane endpoints
    #[serde(default)]
    pub autoscaling: AutoscalingConfig,
}

impl ServingConfig {
    /// Load configuration from an HCL file.
    ///
    /// The file must contain valid HCL content regardless of extension.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ServingError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_hcl(&content)
    }

    /// Parse configuration from an HCL string
    pub fn from_hcl(content: &str) -> Result<Self> {
        hcl::from_str(content)
            .map_err(|e| ServingError::Config(format!("Failed to parse HCL config: {}", e)))
    }

    /// Validate the configuration for consistency.
    ///
    /// Required values (model id, engine endpoint, a usable context-length
    /// set, control-plane URL when autoscaling is enabled) fail fast here;
    /// the replica must not start with an incomplete configuration.
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ServingError::Config(format!(
                "Invalid server.listen_addr '{}'",
                self.server.listen_addr
            )));
        }
        self.engine.validate()?;
        self.admission.validate()?;
        self.autoscaling.validate()?;
        Ok(())
    }
}

/// HTTP server settings for a serving replica
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (default: 0.0.0.0:8000)
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Identity of this replica within its group (default: 0)
    #[serde(default)]
    pub replica_id: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            replica_id: 0,
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}
