//! OpenAI-compatible chat completion wire types
//!
//! Buffered responses use `chat.completion` objects; streaming responses
//! are `chat.completion.chunk` events over SSE, closed by a `[DONE]`
//! sentinel. Incoming conversations are flattened into a single prompt
//! before admission.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::admission::{FinishReason, RawGenerationRequest};

/// Chat completion request
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    /// Requested model; informational, this replica serves one model
    #[serde(default)]
    pub model: String,
    /// Conversation so far
    pub messages: Vec<ChatMessage>,
    /// Stream the response as SSE chunks
    #[serde(default)]
    pub stream: bool,
    /// Completion budget
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Nucleus sampling mass
    #[serde(default)]
    pub top_p: Option<f64>,
    /// Stop sequences
    #[serde(default)]
    pub stop: Option<Vec<String>>,
}

/// One chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatCompletionRequest {
    /// Flatten the conversation into one prompt: role-prefixed lines
    /// followed by a trailing assistant cue.
    pub fn flatten_prompt(&self) -> String {
        let mut prompt = String::new();
        for message in &self.messages {
            prompt.push_str(&message.role);
            prompt.push_str(": ");
            prompt.push_str(&message.content);
            prompt.push('\n');
        }
        prompt.push_str("assistant:");
        prompt
    }

    /// Lower into the plain generation request that admission accepts
    pub fn to_raw(&self) -> RawGenerationRequest {
        RawGenerationRequest {
            prompt: Some(self.flatten_prompt()),
            stream: self.stream,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: None,
            stop: self.stop.clone().unwrap_or_default(),
            context_length: None,
        }
    }
}

/// Buffered chat completion response
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
}

/// One buffered completion choice
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: String,
}

/// Token accounting for a completion
#[derive(Debug, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl ChatCompletionResponse {
    /// Assemble a single-choice response
    pub fn new(
        model: &str,
        content: &str,
        finish_reason: FinishReason,
        prompt_tokens: usize,
        completion_tokens: usize,
    ) -> Self {
        Self {
            id: completion_id(),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: content.to_string(),
                },
                finish_reason: finish_reason.to_string(),
            }],
            usage: Usage {
                prompt_tokens: prompt_tokens as u32,
                completion_tokens: completion_tokens as u32,
                total_tokens: (prompt_tokens + completion_tokens) as u32,
            },
        }
    }
}

/// Streaming chat completion chunk
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

/// One streaming choice
#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Incremental message content
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    fn with_choice(id: &str, model: &str, choice: ChunkChoice) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![choice],
        }
    }

    /// First chunk of a stream: announces the assistant role
    pub fn initial(id: &str, model: &str) -> Self {
        Self::with_choice(
            id,
            model,
            ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: Some("assistant".to_string()),
                    content: None,
                },
                finish_reason: None,
            },
        )
    }

    /// Content-bearing chunk
    pub fn content(id: &str, model: &str, delta: &str) -> Self {
        Self::with_choice(
            id,
            model,
            ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: None,
                    content: Some(delta.to_string()),
                },
                finish_reason: None,
            },
        )
    }

    /// Final chunk carrying the finish reason
    pub fn done(id: &str, model: &str, finish_reason: FinishReason) -> Self {
        Self::with_choice(
            id,
            model,
            ChunkChoice {
                index: 0,
                delta: ChunkDelta::default(),
                finish_reason: Some(finish_reason.to_string()),
            },
        )
    }

    /// Render as one SSE event
    pub fn to_sse(&self) -> String {
        format!(
            "data: {}\n\n",
            serde_json::to_string(self).unwrap_or_default()
        )
    }
}

/// Terminating SSE event
pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// Fresh `chatcmpl-` completion id
pub fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

/// Models listing (`GET /v1/models`)
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

/// One served model
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl ModelList {
    /// Listing with the one model this replica serves
    pub fn single(model_id: &str) -> Self {
        Self {
            object: "list".to_string(),
            data: vec![ModelInfo {
                id: model_id.to_string(),
                object: "model".to_string(),
                created: chrono::Utc::now().timestamp(),
                owned_by: "a3s".to_string(),
            }],
        }
    }
}

/// OpenAI-style error envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct OpenAiError {
    pub error: OpenAiErrorBody,
}

/// Error payload inside the envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct OpenAiErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl OpenAiError {
    /// Client-side request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            error: OpenAiErrorBody {
                message: message.into(),
                kind: "invalid_request_error".to_string(),
            },
        }
    }

    /// Server-side failure
    pub fn server(message: impl Into<String>) -> Self {
        Self {
            error: OpenAiErrorBody {
                message: message.into(),
                kind: "server_error".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_request(stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "qwen-7b".to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "Be brief.".to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: "Hi".to_string(),
                },
            ],
            stream,
            max_tokens: Some(32),
            temperature: Some(0.5),
            top_p: None,
            stop: None,
        }
    }

    #[test]
    fn test_flatten_prompt() {
        let prompt = chat_request(false).flatten_prompt();
        assert_eq!(prompt, "system: Be brief.\nuser: Hi\nassistant:");
    }

    #[test]
    fn test_to_raw_carries_sampling() {
        let raw = chat_request(true).to_raw();
        assert!(raw.prompt.unwrap().ends_with("assistant:"));
        assert!(raw.stream);
        assert_eq!(raw.max_tokens, Some(32));
        assert_eq!(raw.temperature, Some(0.5));
        assert!(raw.stop.is_empty());
        assert!(raw.context_length.is_none());
    }

    #[test]
    fn test_completion_id_prefix() {
        let id = completion_id();
        assert!(id.starts_with("chatcmpl-"));
        assert!(id.len() > "chatcmpl-".len());
    }

    #[test]
    fn test_response_wire_shape() {
        let resp = ChatCompletionResponse::new("qwen-7b", "Hello!", FinishReason::Stop, 12, 3);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["object"], "chat.completion");
        assert_eq!(json["choices"][0]["message"]["role"], "assistant");
        assert_eq!(json["choices"][0]["message"]["content"], "Hello!");
        assert_eq!(json["choices"][0]["finish_reason"], "stop");
        assert_eq!(json["usage"]["total_tokens"], 15);
    }

    #[test]
    fn test_chunk_sequence_shapes() {
        let id = completion_id();

        let initial = serde_json::to_value(ChatCompletionChunk::initial(&id, "m")).unwrap();
        assert_eq!(initial["object"], "chat.completion.chunk");
        assert_eq!(initial["choices"][0]["delta"]["role"], "assistant");
        assert!(initial["choices"][0]["delta"].get("content").is_none());

        let content = serde_json::to_value(ChatCompletionChunk::content(&id, "m", "Hel")).unwrap();
        assert_eq!(content["choices"][0]["delta"]["content"], "Hel");
        assert!(content["choices"][0].get("finish_reason").is_none());

        let done =
            serde_json::to_value(ChatCompletionChunk::done(&id, "m", FinishReason::Length))
                .unwrap();
        assert_eq!(done["choices"][0]["finish_reason"], "length");
        assert!(done["choices"][0]["delta"].get("content").is_none());
    }

    #[test]
    fn test_sse_rendering() {
        let event = ChatCompletionChunk::content("chatcmpl-x", "m", "hi").to_sse();
        assert!(event.starts_with("data: {"));
        assert!(event.ends_with("\n\n"));
        assert_eq!(SSE_DONE, "data: [DONE]\n\n");
    }

    #[test]
    fn test_model_list_shape() {
        let json = serde_json::to_value(ModelList::single("qwen-7b")).unwrap();
        assert_eq!(json["object"], "list");
        assert_eq!(json["data"][0]["id"], "qwen-7b");
        assert_eq!(json["data"][0]["object"], "model");
    }

    #[test]
    fn test_openai_error_shape() {
        let json = serde_json::to_value(OpenAiError::invalid_request("bad body")).unwrap();
        assert_eq!(json["error"]["message"], "bad body");
        assert_eq!(json["error"]["type"], "invalid_request_error");
    }
}
