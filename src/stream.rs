//! Stream module — delta extraction and transport-facing assembly
//!
//! The engine reports accumulated text; `DeltaCursor` turns the snapshots
//! into append-only deltas. `StreamMultiplexer` assembles delivered chunks
//! into a completed generation for buffered responses, and `ndjson_line`
//! renders one chunk for the line-delimited streaming transport.

use serde_json::json;

use crate::admission::{FinishReason, TokenChunk};

/// Byte cursor over the engine's accumulated output.
///
/// The cursor only moves forward: a snapshot shorter than the current
/// offset yields nothing, so retransmitted or stale snapshots can never
/// re-emit text a client has already received.
#[derive(Debug, Default)]
pub struct DeltaCursor {
    offset: usize,
}

impl DeltaCursor {
    /// Cursor at the start of the output
    pub fn new() -> Self {
        Self { offset: 0 }
    }

    /// Return the suffix of `text` past the cursor and advance to its end
    pub fn advance(&mut self, text: &str) -> String {
        if text.len() <= self.offset {
            return String::new();
        }
        let mut start = self.offset;
        while start < text.len() && !text.is_char_boundary(start) {
            start += 1;
        }
        let delta = text[start..].to_string();
        self.offset = text.len();
        delta
    }

    /// Current byte offset into the accumulated output
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// A generation drained to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedGeneration {
    /// Full delivered text, including any prefix
    pub text: String,
    /// Why the generation stopped
    pub finish_reason: FinishReason,
    /// Number of non-empty deltas absorbed
    pub chunks: usize,
}

/// Assembles delivered chunks into one buffered response body.
///
/// The echo endpoint prepends the prompt to the completion; chat-style
/// responses carry the generated text alone. The caller picks by prefix.
#[derive(Debug)]
pub struct StreamMultiplexer {
    text: String,
    finish_reason: Option<FinishReason>,
    chunks: usize,
}

impl StreamMultiplexer {
    /// Start assembling, optionally seeded with a prompt prefix
    pub fn buffered(prefix: Option<&str>) -> Self {
        Self {
            text: prefix.unwrap_or_default().to_string(),
            finish_reason: None,
            chunks: 0,
        }
    }

    /// Fold one chunk into the assembled text
    pub fn absorb(&mut self, chunk: &TokenChunk) {
        if !chunk.delta.is_empty() {
            self.chunks += 1;
        }
        self.text.push_str(&chunk.delta);
        if let Some(reason) = chunk.finish_reason {
            self.finish_reason = Some(reason);
        }
    }

    /// Whether a terminal chunk has been absorbed
    pub fn is_complete(&self) -> bool {
        self.finish_reason.is_some()
    }

    /// Finish assembly; `None` if no terminal chunk arrived
    pub fn into_completed(self) -> Option<CompletedGeneration> {
        let finish_reason = self.finish_reason?;
        Some(CompletedGeneration {
            text: self.text,
            finish_reason,
            chunks: self.chunks,
        })
    }
}

/// Render one chunk as a newline-delimited JSON line.
///
/// Terminal chunks carry the finish reason alongside the delta.
pub fn ndjson_line(chunk: &TokenChunk) -> String {
    let value = match chunk.finish_reason {
        Some(reason) => json!({ "text": chunk.delta, "finish_reason": reason }),
        None => json!({ "text": chunk.delta }),
    };
    let mut line = value.to_string();
    line.push('\n');
    line
}
