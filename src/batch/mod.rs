//! Bounded-concurrency batch runner with retry and per-item bookkeeping.
//!
//! This module drives both document generation and corpus upload:
//!
//! - **WorkQueue**: ordered, indexable collection of named payloads
//! - **BatchRunner**: dispatches items to at most N concurrent slots
//! - **RetryPolicy**: classifies failures and computes backoff delays
//! - **BatchResult**: final per-item states plus aggregate counts
//!
//! # Architecture
//!
//! ```text
//!        WorkQueue (Pending items, lowest index first)
//!                 │
//!          ┌──────▼───────┐     backoff timers
//!          │  dispatcher  │◄──────────────────┐
//!          │ (single      │                   │
//!          │  writer)     │── transient, ─────┘
//!          └──────┬───────┘   attempts left
//!                 │ at most N in flight
//!     ┌───────────┼───────────┐
//!     ▼           ▼           ▼
//! ┌────────┐ ┌────────┐ ┌────────┐
//! │ slot 1 │ │ slot 2 │ │ slot N │   BatchAction::execute(payload)
//! └────────┘ └────────┘ └────────┘
//!                 │
//!          ┌──────▼───────┐
//!          │ BatchResult  │  fold over terminal WorkItems
//!          └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use corpus_forge::batch::{action_fn, BatchRunner, RunnerConfig, WorkQueue};
//!
//! let queue = WorkQueue::new(vec![("Overview".to_string(), "Describe the hotel")])?;
//! let runner = BatchRunner::new(RunnerConfig::default())?;
//! let result = runner
//!     .run(queue, action_fn(|prompt: &'static str| async move { Ok(prompt.len()) }))
//!     .await?;
//! assert_eq!(result.succeeded, 1);
//! ```
//!
//! # State machine
//!
//! Each item moves `Pending → Running → Succeeded | Failed`. A transient
//! failure with attempts remaining moves the item back to `Pending` after a
//! backoff delay; the delay never holds a slot.

pub mod executor;
pub mod item;
pub mod report;
pub mod retry;

pub use executor::{
    action_fn, BatchAction, BatchObserver, BatchRunner, CancelHandle, FnAction, ItemEvent,
    NoopObserver, RunnerConfig,
};
pub use item::{ItemStatus, WorkItem, WorkQueue};
pub use report::{BatchResult, BatchSummary, ItemReport};
pub use retry::{ActionError, ErrorKind, RetryDecision, RetryPolicy, RetryState};
