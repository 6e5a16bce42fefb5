//! Request admission — validation, normalization, and token budgeting
//!
//! The single entry point for turning a raw transport body into an admitted
//! [`GenerationRequest`]. Admission rejects only a missing prompt; an
//! out-of-range context length is clamped to the configured default
//! (deployment policy, not an engine limit), and an exhausted token budget is
//! admitted in degraded form rather than rejected.

mod request;
mod tokenizer;

pub use request::{
    FinishReason, GenerationRequest, GenerationState, RawGenerationRequest, SamplingOptions,
    TokenChunk,
};
pub use tokenizer::{HeuristicTokenCounter, TokenCounter};

#[cfg(test)]
pub(crate) use tokenizer::FixedTokenCounter;

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AdmissionConfig;
use crate::error::{Result, ServingError};
use crate::observability::ServingMetrics;

/// Validates and normalizes incoming generation requests
pub struct RequestAdmission {
    /// Admission policy
    config: AdmissionConfig,
    /// Token counter used for budget computation
    counter: Arc<dyn TokenCounter>,
    /// Metrics collector
    metrics: Arc<ServingMetrics>,
}

impl RequestAdmission {
    /// Create a new admission component
    pub fn new(
        config: AdmissionConfig,
        counter: Arc<dyn TokenCounter>,
        metrics: Arc<ServingMetrics>,
    ) -> Self {
        Self {
            config,
            counter,
            metrics,
        }
    }

    /// Admit a raw request, producing an immutable [`GenerationRequest`].
    ///
    /// No engine interaction happens here; the only side effects are metrics
    /// and a warn log when a context length gets clamped.
    pub fn admit(&self, raw: RawGenerationRequest) -> Result<GenerationRequest> {
        let prompt = match raw.prompt {
            Some(p) if !p.trim().is_empty() => p,
            _ => {
                self.metrics.record_rejected();
                return Err(ServingError::Validation(
                    "Missing required field: prompt".to_string(),
                ));
            }
        };

        let context_length = self.effective_context_length(raw.context_length);

        let input_token_count = self.counter.count(&prompt);
        let remaining = u64::from(context_length).saturating_sub(input_token_count as u64) as u32;
        let requested = raw.max_tokens.unwrap_or(self.config.default_max_tokens);
        let max_new_tokens = requested.min(remaining);

        let request = GenerationRequest {
            id: Uuid::new_v4().to_string(),
            prompt,
            sampling: SamplingOptions {
                temperature: raw.temperature.unwrap_or(1.0),
                top_p: raw.top_p.unwrap_or(1.0),
                top_k: raw.top_k,
                stop: raw.stop,
            },
            context_length,
            input_token_count,
            max_new_tokens,
            stream: raw.stream,
            created_at: Utc::now(),
        };

        if !request.has_token_budget() {
            tracing::debug!(
                request_id = %request.id,
                input_tokens = input_token_count,
                context_length,
                "Token budget exhausted at admission, will complete empty"
            );
        }

        self.metrics.record_admitted();
        Ok(request)
    }

    /// Count tokens with the same counter admission budgets with
    pub fn count_tokens(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    /// Clamp a requested context length to the allowed set.
    ///
    /// An absent value takes the default silently; an explicit value outside
    /// the allowed set is clamped with a warn log and a metric.
    fn effective_context_length(&self, requested: Option<u32>) -> u32 {
        match requested {
            None => self.config.default_context_length,
            Some(v) if self.config.allowed_context_lengths.contains(&v) => v,
            Some(v) => {
                tracing::warn!(
                    requested = v,
                    effective = self.config.default_context_length,
                    allowed = ?self.config.allowed_context_lengths,
                    "Context length outside allowed set, clamped to default"
                );
                self.metrics.record_clamped();
                self.config.default_context_length
            }
        }
    }
}
