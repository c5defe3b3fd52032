//! Corpus manager: generation, corpus provisioning, upload and cleanup.
//!
//! `CorpusManager` owns the configuration, the LLM and corpus clients, and
//! the persisted metadata. Every pass over many documents goes through a
//! [`BatchRunner`] so concurrency, retry and cancellation behave the same
//! for generation and upload.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::batch::{BatchObserver, BatchRunner, CancelHandle, WorkQueue};
use crate::config::ManagerConfig;
use crate::corpus::{
    probe_corpus, CorpusInfo, CorpusMetadata, CorpusProbe, CorpusStatus, CorpusStore,
    HttpCorpusClient, UnconfiguredStore,
};
use crate::documents::generate::partition_existing;
use crate::documents::upload::partition_uploaded;
use crate::documents::{
    list_documents, load_templates, GenerationAction, GenerationReport, UploadAction,
    UploadReport,
};
use crate::error::{DocumentError, ManagerError};
use crate::llm::{LiteLlmClient, LlmProvider};

/// What a generation pass would do, computed before running it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationPlan {
    pub total_templates: usize,
    pub pending: usize,
    pub existing: usize,
}

/// Snapshot of local and remote corpus state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusOverview {
    pub display_name: String,
    pub status: CorpusStatus,
    pub corpus_name: Option<String>,
    pub local_documents: usize,
    /// Documents in the remote corpus, when it could be listed.
    pub remote_documents: Option<usize>,
    /// Documents a complete corpus is expected to hold.
    pub expected_documents: usize,
    pub created_at: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// What a cleanup pass should touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupOptions {
    /// Only count what would be deleted.
    pub dry_run: bool,
    /// Delete generated documents.
    pub local: bool,
    /// Delete the remote corpus.
    pub remote: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            local: true,
            remote: true,
        }
    }
}

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    /// Local documents found.
    pub local_files: Vec<PathBuf>,
    pub local_deleted: usize,
    /// Remote corpus found, if any.
    pub remote_corpus: Option<String>,
    pub remote_deleted: bool,
}

/// Orchestrates the document pipeline against one corpus.
pub struct CorpusManager {
    config: ManagerConfig,
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn CorpusStore>,
    metadata: RwLock<CorpusMetadata>,
}

impl CorpusManager {
    /// Creates a manager with explicit clients, loading persisted metadata.
    pub fn new(
        config: ManagerConfig,
        llm: Arc<dyn LlmProvider>,
        store: Arc<dyn CorpusStore>,
    ) -> Self {
        let metadata = CorpusMetadata::load_or_default(
            &config.metadata_file,
            &config.corpus_display_name,
            config.generation_snapshot(),
        );

        Self {
            config,
            llm,
            store,
            metadata: RwLock::new(metadata),
        }
    }

    /// Creates a manager with HTTP clients built from the configuration.
    ///
    /// Without a corpus service base URL, remote operations fail with
    /// `CorpusError::NotConfigured` while local ones keep working.
    ///
    /// # Errors
    ///
    /// Returns `ManagerError` if an HTTP client cannot be built.
    pub fn from_config(config: ManagerConfig) -> Result<Self, ManagerError> {
        let llm = LiteLlmClient::new(
            config.llm.api_base.clone(),
            config.llm.api_key.clone(),
            config.model.clone(),
        )?;

        let store: Arc<dyn CorpusStore> = match config.corpus_api.api_base {
            Some(ref base) => Arc::new(HttpCorpusClient::new(
                base.clone(),
                config.corpus_api.api_key.clone(),
            )?),
            None => Arc::new(UnconfiguredStore::new("CORPUS_API_BASE is not set")),
        };

        Ok(Self::new(config, Arc::new(llm), store))
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Current metadata snapshot.
    pub async fn metadata(&self) -> CorpusMetadata {
        self.metadata.read().await.clone()
    }

    /// Generated documents currently on disk.
    pub fn local_documents(&self) -> Result<Vec<PathBuf>, ManagerError> {
        Ok(list_documents(&self.config.output_dir)?)
    }

    /// Counts templates and how many still need generating.
    pub fn plan_generation(&self) -> Result<GenerationPlan, ManagerError> {
        let templates = load_templates(&self.config.input_json)?;
        let total_templates = templates.len();
        let (pending, existing) = partition_existing(templates, &self.config.output_dir);
        Ok(GenerationPlan {
            total_templates,
            pending: pending.len(),
            existing: existing.len(),
        })
    }

    /// Generates every template whose document does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `ManagerError` if the templates cannot be loaded, the output
    /// directory cannot be created, or metadata cannot be saved. Individual
    /// generation failures are reported in the `GenerationReport`.
    pub async fn generate_documents(
        &self,
        observer: &dyn BatchObserver,
        cancel: &CancelHandle,
    ) -> Result<GenerationReport, ManagerError> {
        let templates = load_templates(&self.config.input_json)?;
        std::fs::create_dir_all(&self.config.output_dir).map_err(DocumentError::from)?;

        let total_templates = templates.len();
        let (pending, skipped_existing) = partition_existing(templates, &self.config.output_dir);
        info!(
            total = total_templates,
            pending = pending.len(),
            existing = skipped_existing.len(),
            "Starting document generation"
        );

        let batch = if pending.is_empty() {
            info!("Nothing to generate");
            None
        } else {
            let queue = WorkQueue::new(pending.into_iter().map(|t| (t.title.clone(), t)))?;
            let runner = BatchRunner::new(self.config.generation_runner())?;
            let action = GenerationAction::new(
                Arc::clone(&self.llm),
                self.config.model.clone(),
                self.config.additional_instructions.clone(),
                self.config.output_dir.clone(),
            );
            let result = runner.run_with(queue, action, observer, cancel).await?;
            Some(result.summary())
        };

        let report = GenerationReport {
            total_templates,
            skipped_existing,
            batch,
            output_dir: self.config.output_dir.clone(),
        };

        let snapshot = self.config.generation_snapshot();
        self.update_metadata(|metadata| {
            metadata.generation_config = snapshot;
            metadata.record_pass(report.available(), !report.is_complete());
        })
        .await?;

        info!(
            generated = report.generated(),
            failed = report.failed(),
            skipped = report.skipped_existing.len(),
            "Document generation finished"
        );
        Ok(report)
    }

    /// Returns the corpus with the configured display name, creating it if
    /// the service does not have one.
    ///
    /// # Errors
    ///
    /// Returns `ManagerError::Corpus` if the service cannot be reached.
    pub async fn ensure_corpus(&self) -> Result<CorpusInfo, ManagerError> {
        let display_name = self.config.corpus_display_name.as_str();
        let existing = self
            .store
            .list_corpora()
            .await?
            .into_iter()
            .find(|c| c.display_name == display_name);

        if let Some(corpus) = existing {
            info!(corpus = %corpus.name, display_name, "Corpus already exists");
            return Ok(corpus);
        }

        info!(display_name, "Creating corpus");
        let corpus = self.store.create_corpus(display_name).await?;
        self.update_metadata(|metadata| metadata.record_created(&corpus.name, corpus.created_at))
            .await?;
        info!(corpus = %corpus.name, "Corpus created");
        Ok(corpus)
    }

    /// Uploads every local document the corpus does not already hold.
    ///
    /// # Errors
    ///
    /// Returns `ManagerError::NothingToUpload` when there are no local
    /// documents, or `ManagerError::Corpus` if the corpus cannot be listed.
    pub async fn upload_documents(
        &self,
        corpus: &CorpusInfo,
        observer: &dyn BatchObserver,
        cancel: &CancelHandle,
    ) -> Result<UploadReport, ManagerError> {
        let local = self.local_documents()?;
        if local.is_empty() {
            return Err(ManagerError::NothingToUpload(
                self.config.output_dir.display().to_string(),
            ));
        }

        let candidates = local.len();
        let remote = self.store.list_documents(&corpus.name).await?;
        let (pending, already_present) = partition_uploaded(local, &remote);
        info!(
            corpus = %corpus.name,
            candidates,
            pending = pending.len(),
            already_present = already_present.len(),
            "Starting document upload"
        );

        let batch = if pending.is_empty() {
            info!("Corpus already holds every local document");
            None
        } else {
            let queue = WorkQueue::new(pending.into_iter().map(|d| (d.display_name.clone(), d)))?;
            let runner = BatchRunner::new(self.config.upload_runner())?;
            let action = UploadAction::new(Arc::clone(&self.store), corpus.name.clone());
            let result = runner.run_with(queue, action, observer, cancel).await?;
            Some(result.summary())
        };

        let report = UploadReport {
            corpus: corpus.name.clone(),
            candidates,
            already_present,
            batch,
        };

        self.update_metadata(|metadata| {
            if metadata.name.is_empty() {
                metadata.name = corpus.name.clone();
            }
            metadata.record_pass(report.available(), !report.is_complete());
        })
        .await?;

        info!(
            uploaded = report.uploaded(),
            failed = report.failed(),
            "Document upload finished"
        );
        Ok(report)
    }

    /// Probes the service and reconciles the corpus status with metadata.
    pub async fn corpus_status(&self) -> CorpusProbe {
        let expected = self.metadata.read().await.document_count;
        probe_corpus(
            self.store.as_ref(),
            &self.config.corpus_display_name,
            expected,
        )
        .await
    }

    /// Combines local, remote and persisted state.
    pub async fn status_overview(&self) -> Result<StatusOverview, ManagerError> {
        let probe = self.corpus_status().await;
        let local_documents = self.local_documents()?.len();
        let metadata = self.metadata().await;

        Ok(StatusOverview {
            display_name: self.config.corpus_display_name.clone(),
            status: probe.status,
            corpus_name: probe.corpus.map(|c| c.name),
            local_documents,
            remote_documents: probe.remote_documents,
            expected_documents: metadata.document_count,
            created_at: metadata.created_at,
            last_updated: metadata.last_updated,
        })
    }

    /// Deletes generated documents and/or the remote corpus.
    ///
    /// # Errors
    ///
    /// Returns `ManagerError` if a local file or the remote corpus cannot be
    /// deleted.
    pub async fn cleanup(&self, options: CleanupOptions) -> Result<CleanupReport, ManagerError> {
        let local_files = self.local_documents()?;
        let mut report = CleanupReport {
            dry_run: options.dry_run,
            local_files,
            local_deleted: 0,
            remote_corpus: None,
            remote_deleted: false,
        };

        if options.local && !options.dry_run {
            for path in &report.local_files {
                std::fs::remove_file(path).map_err(DocumentError::from)?;
                info!(path = %path.display(), "Deleted local document");
                report.local_deleted += 1;
            }
        }

        if !options.remote {
            return Ok(report);
        }

        let probe = self.corpus_status().await;
        if probe.status == CorpusStatus::Error && probe.corpus.is_none() {
            warn!("Corpus service unavailable, skipping remote cleanup");
        }
        let Some(corpus) = probe.corpus else {
            return Ok(report);
        };
        report.remote_corpus = Some(corpus.name.clone());

        if !options.dry_run {
            self.store.delete_corpus(&corpus.name).await?;
            self.update_metadata(CorpusMetadata::reset_remote).await?;
            info!(corpus = %corpus.name, "Corpus deleted");
            report.remote_deleted = true;
        }

        Ok(report)
    }

    async fn update_metadata<F>(&self, update: F) -> Result<(), ManagerError>
    where
        F: FnOnce(&mut CorpusMetadata),
    {
        let mut metadata = self.metadata.write().await;
        update(&mut metadata);
        metadata
            .save(&self.config.metadata_file)
            .map_err(|e| ManagerError::Metadata(e.to_string()))
    }
}
