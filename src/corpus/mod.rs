//! Managed corpus service integration.
//!
//! The pipeline only needs a handful of remote capabilities, captured by the
//! [`CorpusStore`] trait:
//!
//! - **HttpCorpusClient**: JSON REST client for a hosted corpus service
//! - **InMemoryCorpus**: in-process store with fault injection
//!
//! Status reconciliation compares what the service reports against the
//! locally persisted [`CorpusMetadata`].

pub mod http;
pub mod memory;
pub mod metadata;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::CorpusError;

pub use http::HttpCorpusClient;
pub use memory::{Fault, InMemoryCorpus};
pub use metadata::CorpusMetadata;

/// A corpus known to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusInfo {
    /// Service-assigned resource name.
    pub name: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A document stored in a corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHandle {
    /// Service-assigned resource name.
    pub name: String,
    pub display_name: String,
}

/// A local file to upload into a corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDocument {
    pub path: PathBuf,
    pub display_name: String,
    pub description: String,
}

impl UploadDocument {
    /// Builds an upload from a file path: display name is the file name,
    /// description is the file stem.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let description = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            display_name,
            description,
        }
    }
}

/// Reconciled state of the remote corpus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorpusStatus {
    #[default]
    NotFound,
    Empty,
    Partial,
    Complete,
    Error,
}

impl CorpusStatus {
    /// Status implied by a remote document count.
    pub fn from_document_count(remote: usize, expected: usize) -> Self {
        if remote == 0 {
            CorpusStatus::Empty
        } else if remote < expected {
            CorpusStatus::Partial
        } else {
            CorpusStatus::Complete
        }
    }
}

impl std::fmt::Display for CorpusStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorpusStatus::NotFound => write!(f, "not_found"),
            CorpusStatus::Empty => write!(f, "empty"),
            CorpusStatus::Partial => write!(f, "partial"),
            CorpusStatus::Complete => write!(f, "complete"),
            CorpusStatus::Error => write!(f, "error"),
        }
    }
}

/// Narrow capability interface onto the managed corpus service.
#[async_trait]
pub trait CorpusStore: Send + Sync {
    async fn list_corpora(&self) -> Result<Vec<CorpusInfo>, CorpusError>;

    async fn create_corpus(&self, display_name: &str) -> Result<CorpusInfo, CorpusError>;

    async fn delete_corpus(&self, name: &str) -> Result<(), CorpusError>;

    /// Uploads one local file into `corpus`.
    async fn upload(
        &self,
        corpus: &str,
        document: &UploadDocument,
    ) -> Result<DocumentHandle, CorpusError>;

    async fn list_documents(&self, corpus: &str) -> Result<Vec<DocumentHandle>, CorpusError>;

    async fn delete_document(&self, corpus: &str, document: &str) -> Result<(), CorpusError>;
}

/// Store used when no corpus service is configured; every call fails.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredStore {
    reason: String,
}

impl UnconfiguredStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn error(&self) -> CorpusError {
        CorpusError::NotConfigured(self.reason.clone())
    }
}

#[async_trait]
impl CorpusStore for UnconfiguredStore {
    async fn list_corpora(&self) -> Result<Vec<CorpusInfo>, CorpusError> {
        Err(self.error())
    }

    async fn create_corpus(&self, _display_name: &str) -> Result<CorpusInfo, CorpusError> {
        Err(self.error())
    }

    async fn delete_corpus(&self, _name: &str) -> Result<(), CorpusError> {
        Err(self.error())
    }

    async fn upload(
        &self,
        _corpus: &str,
        _document: &UploadDocument,
    ) -> Result<DocumentHandle, CorpusError> {
        Err(self.error())
    }

    async fn list_documents(&self, _corpus: &str) -> Result<Vec<DocumentHandle>, CorpusError> {
        Err(self.error())
    }

    async fn delete_document(&self, _corpus: &str, _document: &str) -> Result<(), CorpusError> {
        Err(self.error())
    }
}

/// Result of probing the remote service for a corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusProbe {
    pub corpus: Option<CorpusInfo>,
    pub status: CorpusStatus,
    /// Documents in the corpus, when listing succeeded.
    pub remote_documents: Option<usize>,
}

/// Finds the corpus named `display_name` and reconciles its status against
/// the `expected` document count.
///
/// Service failures are folded into `CorpusStatus::Error` rather than
/// returned.
pub async fn probe_corpus(
    store: &dyn CorpusStore,
    display_name: &str,
    expected: usize,
) -> CorpusProbe {
    let corpora = match store.list_corpora().await {
        Ok(corpora) => corpora,
        Err(e) => {
            error!(error = %e, "Error checking corpus status");
            return CorpusProbe {
                corpus: None,
                status: CorpusStatus::Error,
                remote_documents: None,
            };
        }
    };

    let Some(corpus) = corpora.into_iter().find(|c| c.display_name == display_name) else {
        return CorpusProbe {
            corpus: None,
            status: CorpusStatus::NotFound,
            remote_documents: None,
        };
    };

    match store.list_documents(&corpus.name).await {
        Ok(documents) => CorpusProbe {
            status: CorpusStatus::from_document_count(documents.len(), expected),
            remote_documents: Some(documents.len()),
            corpus: Some(corpus),
        },
        Err(e) => {
            warn!(corpus = %corpus.name, error = %e, "Failed to list corpus documents");
            CorpusProbe {
                corpus: Some(corpus),
                status: CorpusStatus::Error,
                remote_documents: None,
            }
        }
    }
}
