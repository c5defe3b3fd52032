//! In-process corpus store.
//!
//! Behaves like the hosted service closely enough for tests and local dry
//! runs, and can be told to fail upcoming calls.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::{CorpusInfo, CorpusStore, DocumentHandle, UploadDocument};
use crate::error::CorpusError;

/// Failure injected into an upcoming upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fails like an overloaded service (retryable).
    Transient,
    /// Fails like a rejected document (not retryable).
    Permanent,
}

#[derive(Debug)]
struct StoredCorpus {
    info: CorpusInfo,
    documents: Vec<DocumentHandle>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    corpora: Vec<StoredCorpus>,
    upload_faults: VecDeque<Fault>,
    fail_corpus_listing: bool,
    fail_document_listing: bool,
    upload_calls: usize,
}

impl State {
    fn corpus_mut(&mut self, name: &str) -> Result<&mut StoredCorpus, CorpusError> {
        self.corpora
            .iter_mut()
            .find(|c| c.info.name == name)
            .ok_or_else(|| CorpusError::CorpusNotFound(name.to_string()))
    }

    fn next_name(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}/{}", prefix, self.next_id)
    }
}

/// Thread-safe in-memory `CorpusStore`.
#[derive(Debug, Default)]
pub struct InMemoryCorpus {
    state: Mutex<State>,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails the next `count` uploads with `fault`.
    pub fn fail_next_uploads(&self, count: usize, fault: Fault) {
        let mut state = self.state();
        state.upload_faults.extend(std::iter::repeat(fault).take(count));
    }

    pub fn fail_corpus_listing(&self, fail: bool) {
        self.state().fail_corpus_listing = fail;
    }

    pub fn fail_document_listing(&self, fail: bool) {
        self.state().fail_document_listing = fail;
    }

    /// Number of upload calls received, failed ones included.
    pub fn upload_calls(&self) -> usize {
        self.state().upload_calls
    }

    /// Adds a document directly, bypassing upload.
    pub fn insert_document(&self, corpus: &str, display_name: &str) {
        let mut state = self.state();
        let name = state.next_name(&format!("{}/documents", corpus));
        if let Ok(stored) = state.corpus_mut(corpus) {
            stored.documents.push(DocumentHandle {
                name,
                display_name: display_name.to_string(),
            });
        }
    }

    /// Display names of all documents in `corpus`.
    pub fn document_names(&self, corpus: &str) -> Vec<String> {
        let mut state = self.state();
        state
            .corpus_mut(corpus)
            .map(|c| c.documents.iter().map(|d| d.display_name.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CorpusStore for InMemoryCorpus {
    async fn list_corpora(&self) -> Result<Vec<CorpusInfo>, CorpusError> {
        let state = self.state();
        if state.fail_corpus_listing {
            return Err(CorpusError::Injected("transient: corpus listing unavailable".into()));
        }
        Ok(state.corpora.iter().map(|c| c.info.clone()).collect())
    }

    async fn create_corpus(&self, display_name: &str) -> Result<CorpusInfo, CorpusError> {
        let mut state = self.state();
        let info = CorpusInfo {
            name: state.next_name("corpora"),
            display_name: display_name.to_string(),
            created_at: Some(Utc::now()),
        };
        state.corpora.push(StoredCorpus {
            info: info.clone(),
            documents: Vec::new(),
        });
        Ok(info)
    }

    async fn delete_corpus(&self, name: &str) -> Result<(), CorpusError> {
        let mut state = self.state();
        let before = state.corpora.len();
        state.corpora.retain(|c| c.info.name != name);
        if state.corpora.len() == before {
            return Err(CorpusError::CorpusNotFound(name.to_string()));
        }
        Ok(())
    }

    async fn upload(
        &self,
        corpus: &str,
        document: &UploadDocument,
    ) -> Result<DocumentHandle, CorpusError> {
        // Real services read the file too
        tokio::fs::metadata(&document.path).await?;

        let mut state = self.state();
        state.upload_calls += 1;
        match state.upload_faults.pop_front() {
            Some(Fault::Transient) => {
                return Err(CorpusError::Injected(format!(
                    "transient: service overloaded uploading {}",
                    document.display_name
                )))
            }
            Some(Fault::Permanent) => {
                return Err(CorpusError::Injected(format!(
                    "rejected document {}",
                    document.display_name
                )))
            }
            None => {}
        }

        let name = state.next_name(&format!("{}/documents", corpus));
        let handle = DocumentHandle {
            name,
            display_name: document.display_name.clone(),
        };
        state.corpus_mut(corpus)?.documents.push(handle.clone());
        Ok(handle)
    }

    async fn list_documents(&self, corpus: &str) -> Result<Vec<DocumentHandle>, CorpusError> {
        let mut state = self.state();
        if state.fail_document_listing {
            return Err(CorpusError::Injected("transient: document listing unavailable".into()));
        }
        Ok(state.corpus_mut(corpus)?.documents.clone())
    }

    async fn delete_document(&self, corpus: &str, document: &str) -> Result<(), CorpusError> {
        let mut state = self.state();
        let stored = state.corpus_mut(corpus)?;
        let before = stored.documents.len();
        stored.documents.retain(|d| d.name != document);
        if stored.documents.len() == before {
            return Err(CorpusError::DocumentNotFound(document.to_string()));
        }
        Ok(())
    }
}
