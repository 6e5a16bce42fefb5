//! Generation request data model — wire input, admitted request, lifecycle state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw generation request as delivered by the transport, before admission.
///
/// Both the raw `/generate` body and the flattened chat-completion request
/// reduce to this shape.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGenerationRequest {
    /// Prompt text (required; its absence is the one hard rejection)
    #[serde(default)]
    pub prompt: Option<String>,

    /// Whether to stream token deltas incrementally
    #[serde(default)]
    pub stream: bool,

    /// Requested token budget; capped by the remaining context window
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f64>,

    /// Nucleus sampling probability mass
    #[serde(default)]
    pub top_p: Option<f64>,

    /// Top-k sampling cutoff
    #[serde(default)]
    pub top_k: Option<u32>,

    /// Stop sequences that end generation early
    #[serde(default)]
    pub stop: Vec<String>,

    /// Requested context length; clamped to the configured default when
    /// outside the allowed set
    #[serde(default)]
    pub context_length: Option<u32>,
}

/// Sampling parameters forwarded to the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingOptions {
    /// Sampling temperature (default: 1.0)
    pub temperature: f64,
    /// Nucleus sampling probability mass (default: 1.0)
    pub top_p: f64,
    /// Top-k cutoff; `None` disables top-k filtering
    pub top_k: Option<u32>,
    /// Stop sequences that end generation early
    pub stop: Vec<String>,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            top_k: None,
            stop: Vec::new(),
        }
    }
}

/// An admitted generation request. Immutable once submitted to the engine.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Globally unique request id (UUID v4)
    pub id: String,
    /// Prompt text
    pub prompt: String,
    /// Sampling parameters
    pub sampling: SamplingOptions,
    /// Effective context length after clamping
    pub context_length: u32,
    /// Prompt token count as estimated by the token counter
    pub input_token_count: usize,
    /// Token budget: min(requested, context_length - input_token_count),
    /// saturating at zero
    pub max_new_tokens: u32,
    /// Whether the client asked for incremental delivery
    pub stream: bool,
    /// Admission timestamp
    pub created_at: DateTime<Utc>,
}

impl GenerationRequest {
    /// Whether the token budget allows any generation at all.
    ///
    /// A zero budget is still admitted; the proxy degrades it to an
    /// immediate empty completion without invoking the engine.
    pub fn has_token_budget(&self) -> bool {
        self.max_new_tokens > 0
    }
}

/// Lifecycle state of one generation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationState {
    /// Admitted, not yet accepted by the engine
    Queued,
    /// Engine is generating
    Running,
    /// First token produced in stream mode
    Streaming,
    /// Reached natural completion
    Completed,
    /// Cancelled before completion
    Aborted,
    /// Engine reported a failure for this request
    Failed,
}

impl GenerationState {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }
}

impl std::fmt::Display for GenerationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Streaming => write!(f, "streaming"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Why a generation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// A stop condition (EOS or stop sequence) was met
    Stop,
    /// The token budget was exhausted
    Length,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Length => write!(f, "length"),
        }
    }
}

/// One incremental unit of generated text.
///
/// Chunks for one request arrive in generation order; concatenating every
/// delta reproduces the final full text. Exactly the last chunk carries a
/// finish reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenChunk {
    /// Text delta since the previous chunk
    pub delta: String,
    /// Present on the terminal chunk only
    pub finish_reason: Option<FinishReason>,
}

impl TokenChunk {
    /// Whether this chunk ends the sequence
    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- raw request parsing ---

    #[test]
    fn test_raw_request_from_json() {
        let body = r#"{
            "prompt": "Hello",
            "stream": true,
            "max_tokens": 64,
            "temperature": 0.7,
            "top_p": 0.9,
            "top_k": 40,
            "stop": ["\n\n"],
            "context_length": 8192
        }"#;
        let raw: RawGenerationRequest = serde_json::from_str(body).unwrap();
        assert_eq!(raw.prompt.as_deref(), Some("Hello"));
        assert!(raw.stream);
        assert_eq!(raw.max_tokens, Some(64));
        assert_eq!(raw.top_k, Some(40));
        assert_eq!(raw.stop, vec!["\n\n".to_string()]);
        assert_eq!(raw.context_length, Some(8192));
    }

    #[test]
    fn test_raw_request_minimal_json() {
        let raw: RawGenerationRequest = serde_json::from_str(r#"{"prompt":"hi"}"#).unwrap();
        assert_eq!(raw.prompt.as_deref(), Some("hi"));
        assert!(!raw.stream);
        assert!(raw.max_tokens.is_none());
        assert!(raw.stop.is_empty());
    }

    #[test]
    fn test_raw_request_ignores_unknown_fields() {
        let raw: RawGenerationRequest =
            serde_json::from_str(r#"{"prompt":"hi","n":3,"echo":false}"#).unwrap();
        assert_eq!(raw.prompt.as_deref(), Some("hi"));
    }

    // --- states ---

    #[test]
    fn test_terminal_states() {
        assert!(!GenerationState::Queued.is_terminal());
        assert!(!GenerationState::Running.is_terminal());
        assert!(!GenerationState::Streaming.is_terminal());
        assert!(GenerationState::Completed.is_terminal());
        assert!(GenerationState::Aborted.is_terminal());
        assert!(GenerationState::Failed.is_terminal());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(GenerationState::Queued.to_string(), "queued");
        assert_eq!(GenerationState::Streaming.to_string(), "streaming");
        assert_eq!(GenerationState::Failed.to_string(), "failed");
    }

    // --- finish reason ---

    #[test]
    fn test_finish_reason_wire_values() {
        assert_eq!(serde_json::to_string(&FinishReason::Stop).unwrap(), "\"stop\"");
        assert_eq!(
            serde_json::to_string(&FinishReason::Length).unwrap(),
            "\"length\""
        );
        let parsed: FinishReason = serde_json::from_str("\"length\"").unwrap();
        assert_eq!(parsed, FinishReason::Length);
    }

    // --- chunks ---

    #[test]
    fn test_chunk_terminality() {
        let mid = TokenChunk {
            delta: "hel".to_string(),
            finish_reason: None,
        };
        let last = TokenChunk {
            delta: "lo".to_string(),
            finish_reason: Some(FinishReason::Stop),
        };
        assert!(!mid.is_terminal());
        assert!(last.is_terminal());
    }

    #[test]
    fn test_sampling_defaults() {
        let sampling = SamplingOptions::default();
        assert!((sampling.temperature - 1.0).abs() < f64::EPSILON);
        assert!((sampling.top_p - 1.0).abs() < f64::EPSILON);
        assert!(sampling.top_k.is_none());
        assert!(sampling.stop.is_empty());
    }
}
