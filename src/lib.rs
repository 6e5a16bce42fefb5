//! # A3S Serving
//!
//! An AI-native model serving replica that fronts a single shared, GPU-bound
//! inference engine for the A3S ecosystem: request admission, incremental
//! token streaming, client-disconnect cancellation, and hysteretic
//! autoscaling.
//!
//! ## Architecture
//!
//! ```text
//! Entrypoint → RequestAdmission → EngineProxy → StreamMultiplexer → Client
//!                                     ↑               ↑
//!                              CancellationWatcher ───┘
//!
//! AutoscalingController (samples ongoing requests, emits scale decisions)
//! ```
//!
//! ## Core Features
//!
//! - **Admission Control**: prompt validation, context-length clamping to a
//!   configured allowed set, token-budget computation
//! - **Shared Engine Proxy**: single submission path with a backpressure
//!   watermark, idempotent abort, ongoing-request gauge
//! - **Streaming**: NDJSON token deltas for the raw endpoint, OpenAI SSE
//!   chunks for chat; monotonic offset cursor over cumulative engine output
//! - **Cancellation**: disconnect detection racing natural completion,
//!   best-effort engine abort
//! - **Autoscaling**: sliding metric windows with dual hysteresis timers,
//!   advisory decisions actuated through a pluggable executor
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use a3s_serving::{config::ServingConfig, Replica};
//!
//! #[tokio::main]
//! async fn main() -> a3s_serving::Result<()> {
//!     let config = ServingConfig::from_file("serving.hcl").await?;
//!     let replica = Replica::new(config)?;
//!     replica.start().await?;
//!     replica.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod admission;
pub(crate) mod api;
pub(crate) mod cancel;
pub mod config;
pub mod engine;
pub(crate) mod entrypoint;
pub mod error;
pub mod observability;
pub mod replica;
pub mod scaling;
pub mod stream;

// Re-export main types
pub use error::{Result, ServingError};
pub use replica::Replica;

use serde::{Deserialize, Serialize};

/// Replica runtime state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaState {
    /// Replica has been created but not yet started
    #[default]
    Created,
    /// Replica is initializing the engine and binding listeners
    Starting,
    /// Replica is actively serving generation requests
    Running,
    /// Replica is draining requests and shutting down
    Stopping,
    /// Replica has fully stopped
    Stopped,
}

impl std::fmt::Display for ReplicaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Replica health status snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Current replica state
    pub state: ReplicaState,
    /// Model served by this replica
    pub model_id: String,
    /// Uptime in seconds since the replica started
    pub uptime_secs: u64,
    /// Number of in-flight generation requests
    pub ongoing_requests: usize,
    /// Total requests admitted since start
    pub admitted_requests: u64,
}
