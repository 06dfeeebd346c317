//! Configuration management for the docsage CLI.
//!
//! Configuration is merged from several sources, lowest precedence first:
//! - Built-in defaults
//! - Config file (`.docsage/config.yaml`)
//! - Environment variables
//! - Command-line flags
//!
//! The configuration is workspace-centric; all state lives in `.docsage/`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Embedding providers the knowledge crate knows how to build.
pub const KNOWN_EMBEDDING_PROVIDERS: [&str; 2] = ["trigram", "ollama"];

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .docsage/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Default knowledge base name
    pub default_base: String,

    /// Embedding provider override ("trigram", "ollama")
    pub embedding_provider: Option<String>,

    /// Embedding model override
    pub embedding_model: Option<String>,

    /// Log level override
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    pub log_json: bool,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    workspace: Option<WorkspaceConfig>,
    embedding: Option<EmbeddingOverrides>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceConfig {
    path: Option<String>,
    #[serde(rename = "defaultBase")]
    default_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmbeddingOverrides {
    provider: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
    json: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            default_base: "default".to_string(),
            embedding_provider: None,
            embedding_model: None,
            log_level: None,
            log_json: false,
            verbose: false,
            no_color: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, the config file and defaults.
    ///
    /// Environment variables:
    /// - `DOCSAGE_WORKSPACE`: Override workspace path
    /// - `DOCSAGE_CONFIG`: Path to config file
    /// - `DOCSAGE_BASE`: Default knowledge base name
    /// - `DOCSAGE_EMBEDDING_PROVIDER`: Embedding provider
    /// - `DOCSAGE_EMBEDDING_MODEL`: Embedding model
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    ///
    /// # Example
    /// ```no_run
    /// use docsage_core::config::AppConfig;
    ///
    /// let config = AppConfig::load().expect("Failed to load config");
    /// println!("Workspace: {:?}", config.workspace);
    /// ```
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(workspace) = std::env::var("DOCSAGE_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }

        if let Ok(config_file) = std::env::var("DOCSAGE_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.docsage_dir().join("config.yaml"));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        // Environment variables override YAML config
        if let Ok(base) = std::env::var("DOCSAGE_BASE") {
            config.default_base = base;
        }

        if let Ok(provider) = std::env::var("DOCSAGE_EMBEDDING_PROVIDER") {
            config.embedding_provider = Some(provider);
        }

        if let Ok(model) = std::env::var("DOCSAGE_EMBEDDING_MODEL") {
            config.embedding_model = Some(model);
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge a YAML configuration file into this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(ws) = config_file.workspace {
            if let Some(path) = ws.path {
                result.workspace = PathBuf::from(path);
            }
            if let Some(base) = ws.default_base {
                result.default_base = base;
            }
        }

        if let Some(embedding) = config_file.embedding {
            if embedding.provider.is_some() {
                result.embedding_provider = embedding.provider;
            }
            if embedding.model.is_some() {
                result.embedding_model = embedding.model;
            }
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
            if let Some(json) = logging.json {
                result.log_json = json;
            }
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// Command-line flags take precedence over environment variables.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        embedding_provider: Option<String>,
        embedding_model: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
        log_json: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(provider) = embedding_provider {
            self.embedding_provider = Some(provider);
        }

        if let Some(model) = embedding_model {
            self.embedding_model = Some(model);
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        if log_json {
            self.log_json = true;
        }

        self
    }

    /// Get the path to the .docsage directory.
    pub fn docsage_dir(&self) -> PathBuf {
        self.workspace.join(".docsage")
    }

    /// Ensure the .docsage directory exists.
    pub fn ensure_docsage_dir(&self) -> AppResult<()> {
        let dir = self.docsage_dir();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                AppError::Config(format!("Failed to create .docsage directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// Validate the merged configuration.
    pub fn validate(&self) -> AppResult<()> {
        if let Some(provider) = &self.embedding_provider {
            if !KNOWN_EMBEDDING_PROVIDERS.contains(&provider.as_str()) {
                return Err(AppError::Config(format!(
                    "Unknown embedding provider: {}. Supported: {}",
                    provider,
                    KNOWN_EMBEDDING_PROVIDERS.join(", ")
                )));
            }
        }

        if self.default_base.trim().is_empty()
            || self.default_base.contains(['/', '\\'])
            || self.default_base.starts_with('.')
        {
            return Err(AppError::Config(format!(
                "Invalid knowledge base name: {:?}",
                self.default_base
            )));
        }

        Ok(())
    }
}
