//! Configuration for the corpus manager.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! environment variables. The result is validated before use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::{RetryPolicy, RunnerConfig};
use crate::llm::{DEFAULT_API_BASE, DEFAULT_MODEL};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "rag_config.json";

const DEFAULT_ADDITIONAL_INSTRUCTIONS: &str = "\nIMPORTANTE: el nombre el hotel es GDG Menorca Resort y está ubicado en Menorca. \
Todos los documentos generados tienen que estar en castellano\n\
No incluyas ningún tipo de explicación o comentario, produce el contenido que se te pidió directamente.";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// The configuration file exists but cannot be parsed.
    #[error("Invalid configuration file '{path}': {message}")]
    InvalidFile { path: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection settings for the chat completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
        }
    }
}

/// Connection settings for the managed corpus service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusApiSettings {
    pub api_base: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

/// Batch runner settings shared by generation and upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    pub concurrency: usize,
    pub item_timeout_secs: Option<u64>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            item_timeout_secs: None,
        }
    }
}

/// Bind address of the health server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
        }
    }
}

/// Complete corpus manager configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Model used for document generation.
    pub model: String,
    /// Suffix appended to every generation prompt.
    pub additional_instructions: String,
    /// JSON array of document templates.
    pub input_json: PathBuf,
    /// Directory for generated documents.
    pub output_dir: PathBuf,
    pub metadata_file: PathBuf,
    pub log_file: PathBuf,
    /// Display name of the remote corpus. Required.
    pub corpus_display_name: String,
    pub llm: LlmSettings,
    pub corpus_api: CorpusApiSettings,
    pub runner: RunnerSettings,
    pub generation_retry: RetryPolicy,
    pub upload_retry: RetryPolicy,
    pub server: ServerSettings,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            additional_instructions: DEFAULT_ADDITIONAL_INSTRUCTIONS.to_string(),
            input_json: PathBuf::from("./data/hotel_chatbot_documents.json"),
            output_dir: PathBuf::from("generated_docs"),
            metadata_file: PathBuf::from("corpus_metadata.json"),
            log_file: PathBuf::from("rag_corpus.log"),
            corpus_display_name: String::new(),
            llm: LlmSettings::default(),
            corpus_api: CorpusApiSettings::default(),
            runner: RunnerSettings::default(),
            generation_retry: RetryPolicy::default(),
            upload_retry: RetryPolicy::default().with_base_delay(Duration::from_millis(2000)),
            server: ServerSettings::default(),
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads defaults, then `path` if it exists, then the environment, and
    /// validates the result.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is malformed, an environment value
    /// cannot be parsed, or validation fails.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file; a missing file yields defaults.
    ///
    /// Keys absent from the file keep their default values.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| ConfigError::InvalidFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Applies overrides from process environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CORPUS_DISPLAY_NAME`: remote corpus display name
    /// - `CORPUS_FORGE_MODEL`: generation model
    /// - `CORPUS_FORGE_INPUT`: template file
    /// - `CORPUS_FORGE_OUTPUT_DIR`: generated documents directory
    /// - `CORPUS_FORGE_LOG_FILE`: log file
    /// - `CORPUS_FORGE_CONCURRENCY`: concurrent items per batch
    /// - `CORPUS_FORGE_ITEM_TIMEOUT_SECS`: per-attempt timeout
    /// - `LITELLM_API_BASE`, `LITELLM_API_KEY`: chat completion endpoint
    /// - `CORPUS_API_BASE`, `CORPUS_API_KEY`: corpus service endpoint
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("CORPUS_DISPLAY_NAME") {
            self.corpus_display_name = val;
        }
        if let Some(val) = lookup("CORPUS_FORGE_MODEL") {
            self.model = val;
        }
        if let Some(val) = lookup("CORPUS_FORGE_INPUT") {
            self.input_json = PathBuf::from(val);
        }
        if let Some(val) = lookup("CORPUS_FORGE_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("CORPUS_FORGE_LOG_FILE") {
            self.log_file = PathBuf::from(val);
        }
        if let Some(val) = lookup("CORPUS_FORGE_CONCURRENCY") {
            self.runner.concurrency = parse_env_value(&val, "CORPUS_FORGE_CONCURRENCY")?;
        }
        if let Some(val) = lookup("CORPUS_FORGE_ITEM_TIMEOUT_SECS") {
            self.runner.item_timeout_secs =
                Some(parse_env_value(&val, "CORPUS_FORGE_ITEM_TIMEOUT_SECS")?);
        }

        if let Some(val) = lookup("LITELLM_API_BASE") {
            self.llm.api_base = val;
        }
        if let Some(val) = lookup("LITELLM_API_KEY") {
            self.llm.api_key = Some(val);
        }
        if let Some(val) = lookup("CORPUS_API_BASE") {
            self.corpus_api.api_base = Some(val);
        }
        if let Some(val) = lookup("CORPUS_API_KEY") {
            self.corpus_api.api_key = Some(val);
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.corpus_display_name.trim().is_empty() {
            return Err(ConfigError::MissingEnvVar("CORPUS_DISPLAY_NAME".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model cannot be empty".to_string(),
            ));
        }
        if self.runner.concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "runner.concurrency must be greater than 0".to_string(),
            ));
        }
        if self.runner.item_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "runner.item_timeout_secs must be greater than 0".to_string(),
            ));
        }
        self.generation_retry
            .validate()
            .map_err(|e| ConfigError::ValidationFailed(format!("generation_retry: {}", e)))?;
        self.upload_retry
            .validate()
            .map_err(|e| ConfigError::ValidationFailed(format!("upload_retry: {}", e)))?;
        Ok(())
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.corpus_display_name = name.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_input_json(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_json = path.into();
        self
    }

    pub fn with_metadata_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.metadata_file = path.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.runner.concurrency = concurrency;
        self
    }

    pub fn with_generation_retry(mut self, policy: RetryPolicy) -> Self {
        self.generation_retry = policy;
        self
    }

    pub fn with_upload_retry(mut self, policy: RetryPolicy) -> Self {
        self.upload_retry = policy;
        self
    }

    fn runner_config(&self, name: &str, retry: &RetryPolicy) -> RunnerConfig {
        let mut config = RunnerConfig::new(self.runner.concurrency)
            .with_name(name)
            .with_retry(retry.clone());
        if let Some(secs) = self.runner.item_timeout_secs {
            config = config.with_item_timeout(Duration::from_secs(secs));
        }
        config
    }

    /// Runner configuration for document generation.
    pub fn generation_runner(&self) -> RunnerConfig {
        self.runner_config("generate", &self.generation_retry)
    }

    /// Runner configuration for corpus upload.
    pub fn upload_runner(&self) -> RunnerConfig {
        self.runner_config("upload", &self.upload_retry)
    }

    /// Generation settings recorded alongside corpus metadata.
    pub fn generation_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "additional_instructions": self.additional_instructions,
            "input_json": self.input_json,
            "concurrency": self.runner.concurrency,
        })
    }
}

/// Parse an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
