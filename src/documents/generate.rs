//! LLM-backed document generation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::{document_path, DocumentTemplate};
use crate::batch::{ActionError, BatchAction, BatchSummary};
use crate::error::LlmError;
use crate::llm::{GenerationRequest, LlmProvider, Message};

/// A document written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDocument {
    pub title: String,
    pub path: PathBuf,
    pub bytes: usize,
}

/// Generates one document per template and writes it to the output directory.
pub struct GenerationAction {
    provider: Arc<dyn LlmProvider>,
    model: String,
    additional_instructions: String,
    output_dir: PathBuf,
}

impl GenerationAction {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        additional_instructions: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            additional_instructions: additional_instructions.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Full prompt sent for `template`.
    pub fn prompt_for(&self, template: &DocumentTemplate) -> String {
        format!("{}{}", template.prompt, self.additional_instructions)
    }
}

#[async_trait]
impl BatchAction for GenerationAction {
    type Payload = DocumentTemplate;
    type Output = GeneratedDocument;

    async fn execute(&self, template: &DocumentTemplate) -> Result<GeneratedDocument, ActionError> {
        let request = GenerationRequest::new(
            self.model.clone(),
            vec![Message::user(self.prompt_for(template))],
        );
        let response = self.provider.generate(request).await?;

        let content = response.first_content().map(str::trim).unwrap_or_default();
        if content.is_empty() {
            return Err(LlmError::EmptyResponse.into());
        }

        let path = document_path(&self.output_dir, &template.title);
        // A partial file must never look like a finished document
        let tmp = path.with_extension("txt.partial");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(title = %template.title, path = %path.display(), bytes = content.len(), "Document written");
        Ok(GeneratedDocument {
            title: template.title.clone(),
            path,
            bytes: content.len(),
        })
    }
}

/// Splits templates into those still to generate and the titles whose
/// output file already exists.
pub fn partition_existing(
    templates: Vec<DocumentTemplate>,
    output_dir: &Path,
) -> (Vec<DocumentTemplate>, Vec<String>) {
    let mut pending = Vec::new();
    let mut existing = Vec::new();
    for template in templates {
        if document_path(output_dir, &template.title).exists() {
            existing.push(template.title);
        } else {
            pending.push(template);
        }
    }
    (pending, existing)
}

/// Outcome of a generation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationReport {
    pub total_templates: usize,
    /// Titles skipped because their document already existed.
    pub skipped_existing: Vec<String>,
    /// Batch outcome; absent when nothing needed generating.
    pub batch: Option<BatchSummary>,
    pub output_dir: PathBuf,
}

impl GenerationReport {
    pub fn generated(&self) -> usize {
        self.batch.as_ref().map_or(0, |b| b.succeeded)
    }

    pub fn failed(&self) -> usize {
        self.batch.as_ref().map_or(0, |b| b.failed)
    }

    /// Documents present locally after the pass.
    pub fn available(&self) -> usize {
        self.generated() + self.skipped_existing.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed() == 0
    }
}
