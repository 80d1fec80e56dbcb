//! Text-generation backend contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Failure talking to the generation backend.
///
/// Every variant is transient from the caller's point of view and is never
/// retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Error getting HTTP response: {0}")]
    Transport(String),

    #[error("Error {0}. The server is likely busy")]
    Busy(u16),

    #[error("Invalid response from backend: {0}")]
    InvalidResponse(String),
}

/// Per-request generation settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Number of tokens the backend may generate
    pub max_length: u32,
    /// Sequences that end generation early
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    /// Backend-specific sampling parameters, passed through unchecked
    #[serde(default)]
    pub sampling: Map<String, Value>,
}

impl GenerationOptions {
    #[must_use]
    pub fn new(max_length: u32) -> Self {
        Self {
            max_length,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_stop_sequences(mut self, stop: Vec<String>) -> Self {
        self.stop_sequences = stop;
        self
    }

    /// Layer sampling values over the current ones; later values win.
    #[must_use]
    pub fn with_sampling(mut self, sampling: &Map<String, Value>) -> Self {
        for (key, value) in sampling {
            self.sampling.insert(key.clone(), value.clone());
        }
        self
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Continue `prompt` and return the generated text.
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError>;

    /// Token count of `text` according to the backend tokenizer.
    async fn count_tokens(&self, text: &str) -> Result<u32, GenerationError>;

    /// Sampling parameters used when a conversation sets none.
    fn default_sampling(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Sampling option names and what they do.
    fn sampling_options(&self) -> &[(&'static str, &'static str)] {
        &[]
    }
}
