//! Upload of local documents into the managed corpus.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::batch::{ActionError, BatchAction, BatchSummary};
use crate::corpus::{CorpusStore, DocumentHandle, UploadDocument};

/// Uploads one local document per work item into a fixed corpus.
///
/// A failed upload may still have landed on the service, so every repeat
/// attempt for a display name first looks for it in the corpus.
pub struct UploadAction {
    store: Arc<dyn CorpusStore>,
    corpus: String,
    attempted: Mutex<HashSet<String>>,
}

impl UploadAction {
    pub fn new(store: Arc<dyn CorpusStore>, corpus: impl Into<String>) -> Self {
        Self {
            store,
            corpus: corpus.into(),
            attempted: Mutex::new(HashSet::new()),
        }
    }

    /// Records an attempt and reports whether one was made before.
    fn mark_attempted(&self, display_name: &str) -> bool {
        let mut attempted = self.attempted.lock().unwrap_or_else(PoisonError::into_inner);
        !attempted.insert(display_name.to_string())
    }

    async fn find_existing(
        &self,
        display_name: &str,
    ) -> Result<Option<DocumentHandle>, ActionError> {
        let documents = self.store.list_documents(&self.corpus).await?;
        Ok(documents
            .into_iter()
            .find(|document| document.display_name == display_name))
    }
}

#[async_trait]
impl BatchAction for UploadAction {
    type Payload = UploadDocument;
    type Output = DocumentHandle;

    async fn execute(&self, document: &UploadDocument) -> Result<DocumentHandle, ActionError> {
        if self.mark_attempted(&document.display_name) {
            if let Some(existing) = self.find_existing(&document.display_name).await? {
                info!(
                    corpus = %self.corpus,
                    document = %existing.display_name,
                    "Document already stored by an earlier attempt"
                );
                return Ok(existing);
            }
        }
        Ok(self.store.upload(&self.corpus, document).await?)
    }
}

/// Splits local files into uploads still needed and display names the
/// corpus already holds.
pub fn partition_uploaded(
    local: Vec<PathBuf>,
    remote: &[DocumentHandle],
) -> (Vec<UploadDocument>, Vec<String>) {
    let present: HashSet<&str> = remote.iter().map(|d| d.display_name.as_str()).collect();

    let mut pending = Vec::new();
    let mut uploaded = Vec::new();
    for path in local {
        let document = UploadDocument::from_path(path);
        if present.contains(document.display_name.as_str()) {
            uploaded.push(document.display_name);
        } else {
            pending.push(document);
        }
    }
    (pending, uploaded)
}

/// Outcome of an upload pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReport {
    pub corpus: String,
    /// Local documents considered.
    pub candidates: usize,
    /// Documents skipped because the corpus already held them.
    pub already_present: Vec<String>,
    /// Batch outcome; absent when nothing needed uploading.
    pub batch: Option<BatchSummary>,
}

impl UploadReport {
    pub fn uploaded(&self) -> usize {
        self.batch.as_ref().map_or(0, |b| b.succeeded)
    }

    pub fn failed(&self) -> usize {
        self.batch.as_ref().map_or(0, |b| b.failed)
    }

    /// Documents in the corpus after the pass.
    pub fn available(&self) -> usize {
        self.uploaded() + self.already_present.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed() == 0
    }
}
