//! Locally persisted corpus bookkeeping.

use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::CorpusStatus;

/// What the pipeline last knew about its corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusMetadata {
    /// Service resource name of the corpus; empty until created.
    #[serde(default)]
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Documents expected in a complete corpus.
    #[serde(default)]
    pub document_count: usize,
    #[serde(default)]
    pub status: CorpusStatus,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    /// Snapshot of the configuration used to generate the documents.
    #[serde(default)]
    pub generation_config: serde_json::Value,
}

impl CorpusMetadata {
    pub fn new(display_name: impl Into<String>, generation_config: serde_json::Value) -> Self {
        Self {
            name: String::new(),
            display_name: display_name.into(),
            created_at: None,
            document_count: 0,
            status: CorpusStatus::NotFound,
            last_updated: None,
            generation_config,
        }
    }

    /// Loads metadata from `path`, falling back to fresh metadata when the
    /// file is missing or unreadable.
    pub fn load_or_default(
        path: &Path,
        display_name: &str,
        generation_config: serde_json::Value,
    ) -> Self {
        if !path.exists() {
            return Self::new(display_name, generation_config);
        }

        let loaded = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                serde_json::from_str::<CorpusMetadata>(&content).map_err(|e| e.to_string())
            });

        match loaded {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load metadata");
                Self::new(display_name, generation_config)
            }
        }
    }

    /// Writes the metadata as pretty JSON, replacing the file atomically.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)
    }

    /// Records the outcome of a generation or upload pass.
    pub fn record_pass(&mut self, document_count: usize, any_failed: bool) {
        self.document_count = document_count;
        self.status = if any_failed {
            CorpusStatus::Partial
        } else {
            CorpusStatus::Complete
        };
        self.last_updated = Some(Utc::now());
    }

    /// Records a freshly created corpus.
    pub fn record_created(&mut self, name: impl Into<String>, created_at: Option<DateTime<Utc>>) {
        self.name = name.into();
        self.created_at = Some(created_at.unwrap_or_else(Utc::now));
        self.status = CorpusStatus::Empty;
    }

    /// Forgets the remote corpus after deletion.
    pub fn reset_remote(&mut self) {
        self.name.clear();
        self.status = CorpusStatus::NotFound;
    }
}
