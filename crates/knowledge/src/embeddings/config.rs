//! Embedding configuration section of a knowledge base config.

use serde::{Deserialize, Serialize};

/// Embedding configuration for a knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Provider name: "trigram" or "ollama"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model identifier (provider-specific)
    #[serde(default = "default_model")]
    pub model: String,

    /// Embedding vector dimensions
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Provider endpoint (Ollama base URL); `OLLAMA_URL` is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Maximum number of texts per embedding request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_provider() -> String {
    "trigram".to_string()
}

fn default_model() -> String {
    "trigram-v1".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_batch_size() -> usize {
    64
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dimensions: default_dimensions(),
            endpoint: None,
            batch_size: default_batch_size(),
        }
    }
}

impl EmbeddingConfig {
    /// Switch provider, picking that provider's default model and dimensions
    /// unless a model is given explicitly.
    pub fn with_provider(mut self, provider: &str, model: Option<&str>) -> Self {
        if provider != self.provider {
            let (default_model, dimensions) = match provider {
                "ollama" => ("nomic-embed-text", 768),
                _ => ("trigram-v1", 384),
            };
            self.provider = provider.to_string();
            self.model = default_model.to_string();
            self.dimensions = dimensions;
        }
        if let Some(model) = model {
            self.model = model.to_string();
        }
        self
    }
}
