//! Engine module — the generation engine seam and the serving proxy
//!
//! `GenerationEngine` abstracts the model runner this replica fronts.
//! `EngineProxy` wraps an engine with the serving-side bookkeeping:
//! the ongoing-request watermark, the in-flight request registry, and
//! idempotent aborts.

pub mod http;
#[cfg(test)]
pub(crate) mod mock;
pub mod proxy;

pub use http::HttpEngine;
#[cfg(test)]
pub(crate) use mock::MockEngine;
pub use proxy::{EngineProxy, TokenStream};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::admission::{FinishReason, GenerationRequest};
use crate::config::EngineConfig;
use crate::error::Result;

/// One update from the engine for an in-flight generation.
///
/// Text fields carry the full accumulated output, not a delta; the
/// token stream derives deltas from its own cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineUpdate {
    /// Generation continues; `text` is the output so far
    Progress { text: String },
    /// Generation finished normally
    Finished {
        text: String,
        finish_reason: FinishReason,
    },
    /// Generation failed inside the engine
    Failed { error: String },
}

/// Async seam to the model runner
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Load the model; called once before the replica accepts traffic
    async fn initialize(&self, config: &EngineConfig) -> Result<()>;

    /// Start a generation and return its update stream
    async fn generate(&self, request: &GenerationRequest)
        -> Result<mpsc::Receiver<EngineUpdate>>;

    /// Ask the engine to stop an in-flight generation
    async fn abort(&self, request_id: &str) -> Result<()>;

    /// Engine name (for logging)
    fn name(&self) -> &str;
}
