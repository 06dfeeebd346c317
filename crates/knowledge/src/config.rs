//! Knowledge base configuration management.

use crate::embeddings::EmbeddingConfig;
use crate::error::{KnowledgeError, KnowledgeResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Per-base configuration stored in `.docsage/knowledge/<base>/config.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBaseConfig {
    /// Knowledge base name (always taken from the directory, not the file)
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

/// How chunk sizes are derived for an ingestion batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSizing {
    /// One plan for the whole batch, from the average effective length
    #[default]
    Batch,
    /// Each document planned from its own effective length
    PerDocument,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub sizing: ChunkSizing,

    /// Chunks whose trimmed length is at or below this are discarded
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
}

fn default_min_chunk_chars() -> usize {
    10
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            sizing: ChunkSizing::default(),
            min_chunk_chars: default_min_chunk_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Tesseract executable
    #[serde(default = "default_ocr_command")]
    pub command: String,

    #[serde(default = "default_ocr_language")]
    pub language: String,

    /// Minimum trimmed length accepted by the quality gate
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,

    /// Per-attempt timeout
    #[serde(default = "default_ocr_timeout")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_ocr_command() -> String {
    "tesseract".to_string()
}

fn default_ocr_language() -> String {
    "eng".to_string()
}

fn default_min_text_chars() -> usize {
    3
}

fn default_ocr_timeout() -> u64 {
    60
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_ocr_command(),
            language: default_ocr_language(),
            min_text_chars: default_min_text_chars(),
            timeout_secs: default_ocr_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of chunks returned per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Drop results scoring below this cosine similarity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
}

fn default_top_k() -> usize {
    8
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: None,
        }
    }
}

/// Load knowledge base configuration.
///
/// Loads from `.docsage/knowledge/<base>/config.yaml` if it exists,
/// otherwise returns defaults named after the base.
pub fn load_config(workspace: &Path, base_name: &str) -> KnowledgeResult<KnowledgeBaseConfig> {
    let config_path = get_config_path(workspace, base_name);

    if !config_path.exists() {
        tracing::debug!(
            "Using default knowledge base config for '{}' (no config file found)",
            base_name
        );
        return Ok(KnowledgeBaseConfig {
            name: base_name.to_string(),
            ..Default::default()
        });
    }

    let content = fs::read_to_string(&config_path).map_err(|e| {
        KnowledgeError::Config(format!("Failed to read config at {:?}: {}", config_path, e))
    })?;

    let mut config: KnowledgeBaseConfig = serde_yaml::from_str(&content).map_err(|e| {
        KnowledgeError::Config(format!("Failed to parse config at {:?}: {}", config_path, e))
    })?;

    config.name = base_name.to_string();
    config.validate()?;

    tracing::debug!("Loaded knowledge base config for '{}'", base_name);
    Ok(config)
}

/// Save knowledge base configuration.
pub fn save_config(workspace: &Path, config: &KnowledgeBaseConfig) -> KnowledgeResult<()> {
    let config_path = get_config_path(workspace, &config.name);

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            KnowledgeError::Config(format!("Failed to create config directory: {}", e))
        })?;
    }

    let yaml = serde_yaml::to_string(config)?;
    fs::write(&config_path, yaml).map_err(|e| {
        KnowledgeError::Config(format!("Failed to write config to {:?}: {}", config_path, e))
    })?;

    tracing::debug!("Saved knowledge base config for '{}'", config.name);
    Ok(())
}

impl KnowledgeBaseConfig {
    /// Apply workspace-level embedding overrides.
    pub fn with_embedding_overrides(mut self, provider: Option<&str>, model: Option<&str>) -> Self {
        let provider = provider.unwrap_or(self.embedding.provider.as_str()).to_string();
        self.embedding = self.embedding.with_provider(&provider, model);
        self
    }

    pub fn validate(&self) -> KnowledgeResult<()> {
        if self.retrieval.top_k == 0 {
            return Err(KnowledgeError::Config(
                "retrieval.top_k must be at least 1".to_string(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(KnowledgeError::Config(
                "embedding.dimensions must be at least 1".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(KnowledgeError::Config(
                "embedding.batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Get the path to a base's config file.
pub fn get_config_path(workspace: &Path, base_name: &str) -> PathBuf {
    get_base_dir(workspace, base_name).join("config.yaml")
}

/// Get the base directory for a knowledge base.
pub fn get_base_dir(workspace: &Path, base_name: &str) -> PathBuf {
    workspace
        .join(".docsage")
        .join("knowledge")
        .join(base_name)
}

/// Get the snapshot directory for a base.
pub fn get_snapshot_dir(workspace: &Path, base_name: &str) -> PathBuf {
    get_base_dir(workspace, base_name).join("snapshot")
}

/// Get the backups directory for a base.
pub fn get_backups_dir(workspace: &Path, base_name: &str) -> PathBuf {
    get_base_dir(workspace, base_name).join("backups")
}
