//! Aggregate reporting over terminal work items.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::item::{ItemStatus, WorkItem};
use super::retry::{ActionError, ErrorKind};

/// Final, read-only result of a batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult<P, T> {
    /// Terminal item states in submission order.
    pub items: Vec<WorkItem<P, T>>,
    /// Items that ended `Succeeded`.
    pub succeeded: usize,
    /// Items that ended `Failed` (cancelled items included).
    pub failed: usize,
    /// Failed items that were cancelled before their first attempt.
    pub skipped: usize,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl<P, T> BatchResult<P, T> {
    /// Folds terminal items into a result.
    ///
    /// Deterministic for a given item collection: items are ordered by their
    /// submission index and counted by final status.
    pub fn from_items(mut items: Vec<WorkItem<P, T>>, elapsed: Duration) -> Self {
        items.sort_by_key(|item| item.index);

        let mut succeeded = 0;
        let mut failed = 0;
        let mut skipped = 0;
        for item in &items {
            match item.status {
                ItemStatus::Succeeded => succeeded += 1,
                _ => {
                    failed += 1;
                    let cancelled = item
                        .last_error
                        .as_ref()
                        .is_some_and(|e| e.kind == ErrorKind::Cancelled);
                    if cancelled && item.attempts == 0 {
                        skipped += 1;
                    }
                }
            }
        }

        Self {
            items,
            succeeded,
            failed,
            skipped,
            elapsed,
        }
    }

    /// Total number of items accounted for.
    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Returns whether every item succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Iterates successful items with their results.
    pub fn successes(&self) -> impl Iterator<Item = (&str, &T)> {
        self.items
            .iter()
            .filter_map(|item| item.result.as_ref().map(|r| (item.id.as_str(), r)))
    }

    /// Payload-free summary suitable for serialization.
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.total(),
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            elapsed_ms: self.elapsed.as_millis() as u64,
            items: self
                .items
                .iter()
                .map(|item| ItemReport {
                    title: item.id.clone(),
                    status: item.status,
                    attempts: item.attempts,
                    error: item.last_error.clone(),
                })
                .collect(),
        }
    }
}

/// Per-item line of a batch report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    pub title: String,
    pub status: ItemStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

/// Serializable view of a `BatchResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed_ms: u64,
    pub items: Vec<ItemReport>,
}

impl BatchSummary {
    /// Success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.succeeded as f64 / self.total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::WorkQueue;

    fn terminal_items() -> Vec<WorkItem<(), u32>> {
        let queue = WorkQueue::new(vec![("a", ()), ("b", ()), ("c", ()), ("d", ())])
            .expect("non-empty");
        let mut items: Vec<WorkItem<(), u32>> = queue.into_items();

        items[0].start_attempt();
        items[0].succeed(10);

        items[1].start_attempt();
        items[1].fail(ActionError::permanent("bad prompt"));

        items[2].fail(ActionError::cancelled());

        items[3].start_attempt();
        items[3].succeed(40);

        // Completion order differs from submission order
        items.reverse();
        items
    }

    #[test]
    fn test_from_items_counts_and_order() {
        let result = BatchResult::from_items(terminal_items(), Duration::from_millis(1500));

        assert_eq!(result.total(), 4);
        assert_eq!(result.succeeded, 2);
        assert_eq!(result.failed, 2);
        assert_eq!(result.skipped, 1);
        assert!(!result.all_succeeded());

        let ids: Vec<&str> = result.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);

        let successes: Vec<(&str, &u32)> = result.successes().collect();
        assert_eq!(successes, vec![("a", &10), ("d", &40)]);
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let items = terminal_items();
        let elapsed = Duration::from_millis(42);

        let first = BatchResult::from_items(items.clone(), elapsed);
        let second = BatchResult::from_items(items, elapsed);
        assert_eq!(first, second);

        let again = BatchResult::from_items(first.items.clone(), elapsed);
        assert_eq!(again, first);
    }

    #[test]
    fn test_summary_serialization() {
        let result = BatchResult::from_items(terminal_items(), Duration::from_millis(5000));
        let summary = result.summary();

        assert_eq!(summary.items.len(), 4);
        assert!((summary.success_rate() - 50.0).abs() < f64::EPSILON);

        let json = serde_json::to_string_pretty(&summary).expect("serialization should succeed");
        assert!(json.contains("\"elapsed_ms\": 5000"));
        assert!(json.contains("\"status\": \"failed\""));
        assert!(json.contains("bad prompt"));
        assert!(json.contains("\"kind\": \"cancelled\""));
    }
}
