//! End-to-end pipeline tests: generation and upload through `CorpusManager`
//! with a scripted model and an in-memory corpus.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use corpus_forge::batch::{CancelHandle, ErrorKind, NoopObserver, RetryPolicy};
use corpus_forge::corpus::{CorpusMetadata, CorpusStatus, CorpusStore, Fault, InMemoryCorpus};
use corpus_forge::llm::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};
use corpus_forge::manager::CleanupOptions;
use corpus_forge::{CorpusManager, LlmError, ManagerConfig, ManagerError};

/// What the scripted model does for prompts containing a marker.
#[derive(Clone, Copy)]
enum Script {
    /// Fail transiently this many times, then answer.
    FlakyThenOk(usize),
    /// Always answer with whitespace only.
    Empty,
}

#[derive(Default)]
struct ScriptedLlm {
    scripts: HashMap<&'static str, Script>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedLlm {
    fn with_script(mut self, marker: &'static str, script: Script) -> Self {
        self.scripts.insert(marker, script);
        self
    }

    fn calls_for(&self, marker: &str) -> usize {
        let calls = self.calls.lock().expect("lock");
        calls
            .iter()
            .filter(|(prompt, _)| prompt.contains(marker))
            .map(|(_, count)| *count)
            .sum()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let prompt = request.messages[0].content.clone();
        let call = {
            let mut calls = self.calls.lock().expect("lock");
            let count = calls.entry(prompt.clone()).or_default();
            *count += 1;
            *count
        };

        let script = self
            .scripts
            .iter()
            .find(|(marker, _)| prompt.contains(*marker))
            .map(|(_, script)| *script);

        let content = match script {
            Some(Script::FlakyThenOk(failures)) if call <= failures => {
                return Err(LlmError::ApiError {
                    code: 503,
                    message: "upstream overloaded".to_string(),
                });
            }
            Some(Script::Empty) => "  \n".to_string(),
            _ => format!("Contenido generado para: {}", prompt.lines().next().unwrap_or_default()),
        };

        Ok(GenerationResponse {
            id: format!("gen-{}", call),
            model: request.model,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: Some("stop".to_string()),
            }],
            usage: Usage::default(),
        })
    }
}

fn write_templates(path: &Path, titles: &[&str]) {
    let templates: Vec<_> = titles
        .iter()
        .map(|title| serde_json::json!({"title": title, "prompt": format!("Describe {}", title)}))
        .collect();
    std::fs::write(path, serde_json::to_string_pretty(&templates).expect("json")).expect("write");
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3)
        .with_base_delay(Duration::from_millis(5))
        .with_max_delay(Duration::from_millis(20))
}

fn config_in(dir: &TempDir) -> ManagerConfig {
    ManagerConfig::default()
        .with_display_name("GDG Menorca Resort")
        .with_input_json(dir.path().join("templates.json"))
        .with_output_dir(dir.path().join("generated_docs"))
        .with_metadata_file(dir.path().join("corpus_metadata.json"))
        .with_concurrency(2)
        .with_generation_retry(fast_retry())
        .with_upload_retry(fast_retry())
}

#[tokio::test]
async fn test_generate_and_upload_full_pipeline() {
    let dir = TempDir::new().expect("temp dir");
    write_templates(
        &dir.path().join("templates.json"),
        &["Hotel Overview", "Rooms & Suites", "Spa"],
    );

    let store = Arc::new(InMemoryCorpus::new());
    let manager = CorpusManager::new(
        config_in(&dir),
        Arc::new(ScriptedLlm::default()),
        store.clone(),
    );
    let cancel = CancelHandle::new();

    let generation = manager
        .generate_documents(&NoopObserver, &cancel)
        .await
        .expect("generation runs");
    assert_eq!(generation.total_templates, 3);
    assert_eq!(generation.generated(), 3);
    assert!(generation.is_complete());
    assert!(dir.path().join("generated_docs/Rooms _ Suites.txt").exists());

    let corpus = manager.ensure_corpus().await.expect("corpus created");
    let upload = manager
        .upload_documents(&corpus, &NoopObserver, &cancel)
        .await
        .expect("upload runs");
    assert_eq!(upload.uploaded(), 3);
    assert!(upload.is_complete());

    let mut names = store.document_names(&corpus.name);
    names.sort();
    assert_eq!(names, vec!["Hotel Overview.txt", "Rooms _ Suites.txt", "Spa.txt"]);

    let overview = manager.status_overview().await.expect("overview");
    assert_eq!(overview.status, CorpusStatus::Complete);
    assert_eq!(overview.local_documents, 3);
    assert_eq!(overview.remote_documents, Some(3));
    assert_eq!(overview.corpus_name.as_deref(), Some(corpus.name.as_str()));

    let persisted = CorpusMetadata::load_or_default(
        &dir.path().join("corpus_metadata.json"),
        "ignored",
        serde_json::Value::Null,
    );
    assert_eq!(persisted.name, corpus.name);
    assert_eq!(persisted.document_count, 3);
    assert_eq!(persisted.status, CorpusStatus::Complete);
    assert_eq!(persisted.generation_config["model"], "gemini-2.5-flash");
}

#[tokio::test]
async fn test_rerun_skips_existing_work() {
    let dir = TempDir::new().expect("temp dir");
    write_templates(&dir.path().join("templates.json"), &["Spa", "Dining"]);

    let store = Arc::new(InMemoryCorpus::new());
    let llm = Arc::new(ScriptedLlm::default());
    let manager = CorpusManager::new(config_in(&dir), llm.clone(), store.clone());
    let cancel = CancelHandle::new();

    manager.generate_documents(&NoopObserver, &cancel).await.expect("first pass");
    let corpus = manager.ensure_corpus().await.expect("corpus");
    manager
        .upload_documents(&corpus, &NoopObserver, &cancel)
        .await
        .expect("first upload");

    let generation = manager
        .generate_documents(&NoopObserver, &cancel)
        .await
        .expect("second pass");
    assert!(generation.batch.is_none());
    assert_eq!(generation.skipped_existing.len(), 2);
    assert_eq!(llm.calls_for("Spa"), 1);

    let again = manager.ensure_corpus().await.expect("same corpus");
    assert_eq!(again, corpus);

    let upload = manager
        .upload_documents(&corpus, &NoopObserver, &cancel)
        .await
        .expect("second upload");
    assert!(upload.batch.is_none());
    assert_eq!(upload.already_present.len(), 2);
    assert_eq!(store.upload_calls(), 2);
    assert_eq!(store.list_corpora().await.expect("lists").len(), 1);
}

#[tokio::test]
async fn test_generation_failures_are_isolated() {
    let dir = TempDir::new().expect("temp dir");
    write_templates(
        &dir.path().join("templates.json"),
        &["Flaky Topic", "Empty Topic", "Solid Topic"],
    );

    let llm = Arc::new(
        ScriptedLlm::default()
            .with_script("Flaky", Script::FlakyThenOk(2))
            .with_script("Empty", Script::Empty),
    );
    let manager = CorpusManager::new(config_in(&dir), llm.clone(), Arc::new(InMemoryCorpus::new()));

    let report = manager
        .generate_documents(&NoopObserver, &CancelHandle::new())
        .await
        .expect("generation runs");

    let batch = report.batch.as_ref().expect("batch ran");
    let by_title: HashMap<&str, _> = batch.items.iter().map(|i| (i.title.as_str(), i)).collect();

    assert_eq!(by_title["Flaky Topic"].attempts, 3);
    assert!(by_title["Flaky Topic"].error.is_none());
    assert_eq!(by_title["Empty Topic"].attempts, 1);
    assert_eq!(
        by_title["Empty Topic"].error.as_ref().map(|e| e.kind),
        Some(ErrorKind::Permanent)
    );
    assert_eq!(by_title["Solid Topic"].attempts, 1);

    assert_eq!(report.generated(), 2);
    assert_eq!(report.failed(), 1);
    assert!(!dir.path().join("generated_docs/Empty Topic.txt").exists());
    assert_eq!(llm.calls_for("Flaky"), 3);

    let metadata = manager.metadata().await;
    assert_eq!(metadata.status, CorpusStatus::Partial);
    assert_eq!(metadata.document_count, 2);
}

#[tokio::test]
async fn test_upload_retries_transient_faults() {
    let dir = TempDir::new().expect("temp dir");
    write_templates(&dir.path().join("templates.json"), &["Spa", "Rooms", "Pool"]);

    let store = Arc::new(InMemoryCorpus::new());
    let manager = CorpusManager::new(
        config_in(&dir).with_concurrency(1),
        Arc::new(ScriptedLlm::default()),
        store.clone(),
    );
    let cancel = CancelHandle::new();
    manager.generate_documents(&NoopObserver, &cancel).await.expect("generated");

    let corpus = manager.ensure_corpus().await.expect("corpus");
    store.fail_next_uploads(2, Fault::Transient);
    let report = manager
        .upload_documents(&corpus, &NoopObserver, &cancel)
        .await
        .expect("upload runs");

    assert_eq!(report.uploaded(), 3);
    assert!(report.is_complete());
    assert_eq!(store.upload_calls(), 5);
    let batch = report.batch.expect("batch ran");
    assert_eq!(batch.items.iter().map(|i| i.attempts).sum::<u32>(), 5);
}

#[tokio::test]
async fn test_permanent_upload_fault_leaves_corpus_partial() {
    let dir = TempDir::new().expect("temp dir");
    write_templates(&dir.path().join("templates.json"), &["Spa", "Rooms"]);

    let store = Arc::new(InMemoryCorpus::new());
    let manager = CorpusManager::new(
        config_in(&dir).with_concurrency(1),
        Arc::new(ScriptedLlm::default()),
        store.clone(),
    );
    let cancel = CancelHandle::new();
    manager.generate_documents(&NoopObserver, &cancel).await.expect("generated");

    let corpus = manager.ensure_corpus().await.expect("corpus");
    store.fail_next_uploads(1, Fault::Permanent);
    let report = manager
        .upload_documents(&corpus, &NoopObserver, &cancel)
        .await
        .expect("upload runs");

    assert_eq!(report.uploaded(), 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(manager.metadata().await.status, CorpusStatus::Partial);
}

#[tokio::test]
async fn test_cancelled_generation_reports_every_template() {
    let dir = TempDir::new().expect("temp dir");
    write_templates(&dir.path().join("templates.json"), &["A", "B", "C", "D"]);

    let manager = CorpusManager::new(
        config_in(&dir),
        Arc::new(ScriptedLlm::default()),
        Arc::new(InMemoryCorpus::new()),
    );
    let cancel = CancelHandle::new();
    cancel.cancel();

    let report = manager
        .generate_documents(&NoopObserver, &cancel)
        .await
        .expect("generation runs");
    assert_eq!(report.generated(), 0);
    let batch = report.batch.as_ref().expect("batch ran");
    assert_eq!(batch.total, 4);
    assert_eq!(batch.skipped, 4);
}

#[tokio::test]
async fn test_missing_templates_file() {
    let dir = TempDir::new().expect("temp dir");
    let manager = CorpusManager::new(
        config_in(&dir),
        Arc::new(ScriptedLlm::default()),
        Arc::new(InMemoryCorpus::new()),
    );

    let err = manager
        .generate_documents(&NoopObserver, &CancelHandle::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::Document(_)));
}

#[tokio::test]
async fn test_full_cleanup() {
    let dir = TempDir::new().expect("temp dir");
    write_templates(&dir.path().join("templates.json"), &["Spa"]);

    let store = Arc::new(InMemoryCorpus::new());
    let manager = CorpusManager::new(
        config_in(&dir),
        Arc::new(ScriptedLlm::default()),
        store.clone(),
    );
    let cancel = CancelHandle::new();
    manager.generate_documents(&NoopObserver, &cancel).await.expect("generated");
    let corpus = manager.ensure_corpus().await.expect("corpus");
    manager
        .upload_documents(&corpus, &NoopObserver, &cancel)
        .await
        .expect("uploaded");

    let report = manager
        .cleanup(CleanupOptions {
            dry_run: false,
            local: true,
            remote: true,
        })
        .await
        .expect("cleanup");

    assert_eq!(report.local_deleted, 1);
    assert!(report.remote_deleted);
    assert!(store.list_corpora().await.expect("lists").is_empty());
    assert!(manager.local_documents().expect("lists").is_empty());
    assert_eq!(manager.corpus_status().await.status, CorpusStatus::NotFound);
}
