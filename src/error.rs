//! Error types for corpus-forge operations.
//!
//! Defines error types for the major subsystems:
//! - Batch construction and runner configuration
//! - LLM API interactions
//! - Managed corpus service interactions
//! - Document template loading and output files
//! - Corpus manager orchestration

use thiserror::Error;

use crate::batch::{ActionError, ErrorKind};

/// Errors returned synchronously by the batch runner.
///
/// Per-item failures never surface here; they are captured on the
/// individual work items and reported in the `BatchResult`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("Batch is empty: at least one work item is required")]
    EmptyBatch,

    #[error("Invalid runner configuration: {0}")]
    InvalidConfig(String),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Model returned an empty response")]
    EmptyResponse,
}

impl LlmError {
    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(msg) => is_transport_message(msg),
            LlmError::RateLimited(_) => true,
            LlmError::ApiError { code, .. } => *code >= 500 || *code == 429,
            _ => false,
        }
    }
}

impl From<LlmError> for ActionError {
    fn from(err: LlmError) -> Self {
        let kind = if err.is_transient() {
            ErrorKind::Transient
        } else {
            ErrorKind::Permanent
        };
        ActionError::new(kind, err.to_string())
    }
}

/// Errors that can occur while talking to the managed corpus service.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("Corpus '{0}' not found")]
    CorpusNotFound(String),

    #[error("Document '{0}' not found")]
    DocumentNotFound(String),

    #[error("Corpus service is not configured: {0}")]
    NotConfigured(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse corpus service response: {0}")]
    ParseError(String),

    #[error("Corpus service error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Injected failure: {0}")]
    Injected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CorpusError {
    /// Whether a retry of the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CorpusError::RequestFailed(msg) => is_transport_message(msg),
            CorpusError::ApiError { code, .. } => *code >= 500 || *code == 429 || *code == 408,
            CorpusError::Injected(msg) => msg.starts_with("transient"),
            _ => false,
        }
    }
}

impl From<CorpusError> for ActionError {
    fn from(err: CorpusError) -> Self {
        let kind = if err.is_transient() {
            ErrorKind::Transient
        } else {
            ErrorKind::Permanent
        };
        ActionError::new(kind, err.to_string())
    }
}

/// Errors that can occur while loading templates or writing documents.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Input file not found: {0}")]
    InputNotFound(String),

    #[error("Invalid template file '{path}': {message}")]
    InvalidTemplates { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by the corpus manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("No documents found to upload in {0}")]
    NothingToUpload(String),

    #[error("Failed to persist corpus metadata: {0}")]
    Metadata(String),
}

/// Describes a reqwest failure so transport problems stay recognisable.
pub(crate) fn transport_message(err: &reqwest::Error) -> String {
    let mut message = if err.is_timeout() {
        format!("request timed out: {}", err)
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    };
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Transport-level failures that are worth retrying.
fn is_transport_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("connection")
        || msg.contains("temporarily")
        || msg.contains("reset")
}
