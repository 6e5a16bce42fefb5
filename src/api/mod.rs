//! API module — wire types for the serving endpoints
//!
//! The plain endpoints speak a minimal JSON dialect; the OpenAI-compatible
//! surface lives in [`openai`].

pub mod openai;

use serde::{Deserialize, Serialize};

/// JSON error body returned by the plain endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable error message
    pub error: String,
}

impl ErrorBody {
    /// Create an error body with the given message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Body of a buffered `/generate` response.
///
/// `text` keeps the engine's list-of-candidates shape with a single entry
/// holding the prompt followed by the completion.
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: Vec<String>,
}

impl GenerateResponse {
    /// Wrap one candidate
    pub fn single(text: impl Into<String>) -> Self {
        Self {
            text: vec![text.into()],
        }
    }
}
