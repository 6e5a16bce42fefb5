//! Admission configuration — context-length policy and default token budget

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServingError};

/// Request admission policy
///
/// The allowed context-length set is a deployment policy, not an engine
/// limit: requests asking for any other value are clamped to
/// `default_context_length` rather than rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Context lengths this deployment accepts (default: [8192, 32768])
    #[serde(default = "default_allowed_context_lengths")]
    pub allowed_context_lengths: Vec<u32>,

    /// Context length applied when a request asks for a value outside the
    /// allowed set, or asks for none (default: 8192)
    #[serde(default = "default_context_length")]
    pub default_context_length: u32,

    /// Token budget applied when a request carries no max_tokens (default: 512)
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
}

impl AdmissionConfig {
    /// Validate admission settings
    pub fn validate(&self) -> Result<()> {
        if self.allowed_context_lengths.is_empty() {
            return Err(ServingError::Config(
                "admission.allowed_context_lengths must not be empty".to_string(),
            ));
        }
        if !self
            .allowed_context_lengths
            .contains(&self.default_context_length)
        {
            return Err(ServingError::Config(format!(
                "admission.default_context_length {} is not in allowed_context_lengths {:?}",
                self.default_context_length, self.allowed_context_lengths
            )));
        }
        if self.default_max_tokens == 0 {
            return Err(ServingError::Config(
                "admission.default_max_tokens must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            allowed_context_lengths: default_allowed_context_lengths(),
            default_context_length: default_context_length(),
            default_max_tokens: default_max_tokens(),
        }
    }
}

fn default_allowed_context_lengths() -> Vec<u32> {
    vec![8192, 32768]
}

fn default_context_length() -> u32 {
    8192
}

fn default_max_tokens() -> u32 {
    512
}
