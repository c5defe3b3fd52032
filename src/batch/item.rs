//! Work item definitions for the batch runner.
//!
//! - `WorkQueue`: the ordered batch submitted by a caller
//! - `WorkItem`: one unit of work and its mutable execution state
//! - `ItemStatus`: where an item is in its lifecycle

use serde::{Deserialize, Serialize};

use super::retry::ActionError;
use crate::error::BatchError;

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting for a free slot (initially, or after a retry backoff).
    Pending,
    /// An attempt is in flight.
    Running,
    /// The action produced a result.
    Succeeded,
    /// The action failed permanently, exhausted its attempts, or was cancelled.
    Failed,
}

impl ItemStatus {
    /// Returns whether no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Succeeded | ItemStatus::Failed)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "pending"),
            ItemStatus::Running => write!(f, "running"),
            ItemStatus::Succeeded => write!(f, "succeeded"),
            ItemStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One unit of batch work: a named payload plus its execution state.
///
/// Only the runner that owns the batch mutates an item, and never after it
/// reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkItem<P, T> {
    /// Position in the submitted batch.
    pub index: usize,
    /// Human-readable identifier (document title or file name).
    pub id: String,
    /// Opaque payload handed to the action.
    #[serde(skip)]
    pub payload: P,
    /// Current lifecycle status.
    pub status: ItemStatus,
    /// Number of attempts started so far.
    pub attempts: u32,
    /// Error recorded by the most recent failed attempt.
    pub last_error: Option<ActionError>,
    /// Result produced on success.
    #[serde(skip)]
    pub result: Option<T>,
}

impl<P, T> WorkItem<P, T> {
    fn new(index: usize, id: String, payload: P) -> Self {
        Self {
            index,
            id,
            payload,
            status: ItemStatus::Pending,
            attempts: 0,
            last_error: None,
            result: None,
        }
    }

    /// Returns whether the item succeeded.
    pub fn is_success(&self) -> bool {
        self.status == ItemStatus::Succeeded
    }

    pub(crate) fn start_attempt(&mut self) {
        debug_assert_eq!(self.status, ItemStatus::Pending);
        self.status = ItemStatus::Running;
        self.attempts += 1;
    }

    pub(crate) fn succeed(&mut self, result: T) {
        debug_assert!(!self.status.is_terminal());
        self.status = ItemStatus::Succeeded;
        self.result = Some(result);
        self.last_error = None;
    }

    pub(crate) fn fail(&mut self, error: ActionError) {
        debug_assert!(!self.status.is_terminal());
        self.status = ItemStatus::Failed;
        self.last_error = Some(error);
    }

    pub(crate) fn requeue(&mut self, error: ActionError) {
        debug_assert_eq!(self.status, ItemStatus::Running);
        self.status = ItemStatus::Pending;
        self.last_error = Some(error);
    }
}

/// Ordered, indexable batch of named payloads.
///
/// Construction copies the caller's input; the caller's collection is never
/// mutated.
#[derive(Debug, Clone)]
pub struct WorkQueue<P> {
    entries: Vec<(String, P)>,
}

impl<P> WorkQueue<P> {
    /// Creates a queue from `(identifier, payload)` pairs.
    ///
    /// # Errors
    ///
    /// Returns `BatchError::EmptyBatch` if `entries` is empty.
    pub fn new<I, S>(entries: I) -> Result<Self, BatchError>
    where
        I: IntoIterator<Item = (S, P)>,
        S: Into<String>,
    {
        let entries: Vec<(String, P)> = entries
            .into_iter()
            .map(|(id, payload)| (id.into(), payload))
            .collect();

        if entries.is_empty() {
            return Err(BatchError::EmptyBatch);
        }

        Ok(Self { entries })
    }

    /// Returns the number of items in the batch.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// A constructed queue is never empty; provided for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the identifier and payload at `index`.
    pub fn get(&self, index: usize) -> Option<(&str, &P)> {
        self.entries
            .get(index)
            .map(|(id, payload)| (id.as_str(), payload))
    }

    /// Iterates identifiers and payloads in submission order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &P)> {
        self.entries.iter().map(|(id, p)| (id.as_str(), p))
    }

    /// Converts the queue into fresh `Pending` work items.
    pub fn into_items<T>(self) -> Vec<WorkItem<P, T>> {
        self.entries
            .into_iter()
            .enumerate()
            .map(|(index, (id, payload))| WorkItem::new(index, id, payload))
            .collect()
    }
}
