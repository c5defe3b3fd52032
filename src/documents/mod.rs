//! Document templates and local document files.
//!
//! - **generate**: turns templates into `.txt` documents through the LLM
//! - **upload**: pushes local documents into the managed corpus

pub mod generate;
pub mod upload;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DocumentError;

pub use generate::{GeneratedDocument, GenerationAction, GenerationReport};
pub use upload::{UploadAction, UploadReport};

/// Extension of generated documents.
pub const DOCUMENT_EXTENSION: &str = "txt";

/// One document to generate: a title and the prompt that produces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTemplate {
    pub title: String,
    pub prompt: String,
}

/// Loads templates from a JSON array of `{title, prompt}` objects.
///
/// # Errors
///
/// Returns `DocumentError::InputNotFound` if the file does not exist and
/// `DocumentError::InvalidTemplates` if it is not a valid template array.
pub fn load_templates(path: &Path) -> Result<Vec<DocumentTemplate>, DocumentError> {
    if !path.exists() {
        return Err(DocumentError::InputNotFound(path.display().to_string()));
    }

    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| DocumentError::InvalidTemplates {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn unsafe_chars() -> &'static Regex {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    UNSAFE.get_or_init(|| Regex::new(r"[^\w\-. ]").expect("static pattern is valid"))
}

/// Replaces every character that is not a word character, `-`, `.` or a
/// space with `_`.
pub fn sanitize_filename(name: &str) -> String {
    unsafe_chars().replace_all(name, "_").into_owned()
}

/// Path of the document generated for `title` inside `output_dir`.
pub fn document_path(output_dir: &Path, title: &str) -> PathBuf {
    output_dir.join(format!("{}.{}", sanitize_filename(title), DOCUMENT_EXTENSION))
}

/// Lists the generated documents in `dir`, sorted by file name.
///
/// A missing directory holds no documents.
pub fn list_documents(dir: &Path) -> Result<Vec<PathBuf>, DocumentError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut documents = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_document = path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext == DOCUMENT_EXTENSION);
        if is_document {
            documents.push(path);
        }
    }
    documents.sort();
    Ok(documents)
}
