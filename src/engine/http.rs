//! HTTP engine client — streams generations from the model-runner sidecar
//!
//! The sidecar speaks newline-delimited JSON: each line of the `/generate`
//! response body carries the accumulated output so far, and the final line
//! sets `finish_reason`.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::admission::{FinishReason, GenerationRequest};
use crate::config::EngineConfig;
use crate::engine::{EngineUpdate, GenerationEngine};
use crate::error::{Result, ServingError};

/// Wire body for starting a generation
#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    request_id: &'a str,
    prompt: &'a str,
    max_new_tokens: u32,
    temperature: f64,
    top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    stop: &'a [String],
}

/// One newline-delimited JSON line from the engine
#[derive(Debug, Deserialize)]
struct EngineLine {
    #[serde(default)]
    text: String,
    #[serde(default)]
    finish_reason: Option<FinishReason>,
}

/// Engine client speaking HTTP to a model-runner sidecar
pub struct HttpEngine {
    /// Base URL of the sidecar (e.g., "http://127.0.0.1:8500")
    base_url: String,
    /// HTTP client
    client: reqwest::Client,
}

impl HttpEngine {
    /// Create a client for the sidecar at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl GenerationEngine for HttpEngine {
    async fn initialize(&self, config: &EngineConfig) -> Result<()> {
        let url = format!("{}/initialize", self.base_url);
        let body = serde_json::json!({
            "model_id": config.model_id,
            "tensor_parallel_size": config.tensor_parallel_size,
            "gpu_memory_utilization": config.gpu_memory_utilization,
        });

        let resp = self.client.post(&url).json(&body).send().await.map_err(|e| {
            ServingError::EngineInit(format!("Engine initialize request failed: {}", e))
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ServingError::EngineInit(format!(
                "Engine initialize returned {}: {}",
                status, body
            )));
        }

        Ok(())
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<mpsc::Receiver<EngineUpdate>> {
        let url = format!("{}/generate", self.base_url);
        let body = GenerateBody {
            request_id: &request.id,
            prompt: &request.prompt,
            max_new_tokens: request.max_new_tokens,
            temperature: request.sampling.temperature,
            top_p: request.sampling.top_p,
            top_k: request.sampling.top_k,
            stop: &request.sampling.stop,
        };

        let resp = self.client.post(&url).json(&body).send().await.map_err(|e| {
            ServingError::Engine(format!("Engine generate request failed: {}", e))
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ServingError::Engine(format!(
                "Engine generate returned {}: {}",
                status, text
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        let request_id = request.id.clone();

        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(next) = stream.next().await {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(EngineUpdate::Failed {
                                error: format!("Engine stream error: {}", e),
                            })
                            .await;
                        return;
                    }
                };

                buffer.extend_from_slice(&chunk);
                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    let parsed: EngineLine = match serde_json::from_str(line) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            let _ = tx
                                .send(EngineUpdate::Failed {
                                    error: format!("Malformed engine line: {}", e),
                                })
                                .await;
                            return;
                        }
                    };

                    if let Some(finish_reason) = parsed.finish_reason {
                        let _ = tx
                            .send(EngineUpdate::Finished {
                                text: parsed.text,
                                finish_reason,
                            })
                            .await;
                        return;
                    }

                    let update = EngineUpdate::Progress { text: parsed.text };
                    if tx.send(update).await.is_err() {
                        // Receiver gone: stop reading, the connection drops.
                        debug!(request_id = %request_id, "Engine stream consumer went away");
                        return;
                    }
                }
            }

            // The body ended with no finish marker.
            let _ = tx
                .send(EngineUpdate::Failed {
                    error: format!("Engine stream for '{}' ended without finish", request_id),
                })
                .await;
        });

        Ok(rx)
    }

    async fn abort(&self, request_id: &str) -> Result<()> {
        let url = format!("{}/abort", self.base_url);
        let body = serde_json::json!({ "request_id": request_id });

        let resp = self.client.post(&url).json(&body).send().await.map_err(|e| {
            ServingError::Engine(format!("Engine abort request failed: {}", e))
        })?;

        if !resp.status().is_success() {
            return Err(ServingError::Engine(format!(
                "Engine abort returned {}",
                resp.status()
            )));
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}
