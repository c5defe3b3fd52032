//! corpus-forge: LLM document generation and managed corpus upload.
//!
//! Prompt templates are turned into text documents through an
//! OpenAI-compatible chat completion API, then uploaded into a managed
//! retrieval corpus. Both passes run through [`batch::BatchRunner`], a
//! bounded-concurrency runner with retry and per-item bookkeeping.

pub mod batch;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod documents;
pub mod error;
pub mod llm;
pub mod manager;
pub mod server;

pub use batch::{
    ActionError, BatchAction, BatchResult, BatchRunner, CancelHandle, ErrorKind, RetryPolicy,
    RunnerConfig, WorkQueue,
};
pub use config::{ConfigError, ManagerConfig};
pub use error::{BatchError, CorpusError, DocumentError, LlmError, ManagerError};
pub use manager::CorpusManager;
