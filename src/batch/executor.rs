//! Concurrency-limited executor for work items.
//!
//! A single dispatch loop owns every `WorkItem`. Attempts run as tokio tasks
//! in a `JoinSet` bounded by the configured concurrency; items waiting out a
//! retry backoff sit in a deadline heap and hold no slot. All status changes
//! happen in the dispatch loop, so observers see transitions one at a time.
//!
//! # Features
//!
//! - At most N attempts in flight
//! - Lowest submission index dispatched first
//! - Exponential backoff that never stalls other items
//! - Optional per-attempt timeout
//! - Batch-wide cancellation that lets in-flight attempts finish

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::item::{ItemStatus, WorkItem, WorkQueue};
use super::report::BatchResult;
use super::retry::{ActionError, RetryDecision, RetryPolicy, RetryState};
use crate::error::BatchError;

/// Default number of concurrent execution slots.
const DEFAULT_CONCURRENCY: usize = 5;

/// Configuration for a batch runner.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Label used in log lines.
    pub name: String,
    /// Maximum number of items running at once.
    pub concurrency: usize,
    /// Retry policy applied to failed attempts.
    pub retry: RetryPolicy,
    /// Maximum duration of a single attempt.
    pub item_timeout: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            name: "batch".to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            item_timeout: None,
        }
    }
}

impl RunnerConfig {
    /// Creates a configuration with the given concurrency limit.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Default::default()
        }
    }

    /// Sets the log label.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = Some(timeout);
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `BatchError::InvalidConfig` if any value is out of range.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.concurrency == 0 {
            return Err(BatchError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.item_timeout == Some(Duration::ZERO) {
            return Err(BatchError::InvalidConfig(
                "item_timeout must be greater than 0".to_string(),
            ));
        }
        self.retry.validate()
    }
}

/// The operation performed for each work item.
///
/// Implementations must be safe to call concurrently up to the runner's
/// concurrency limit.
#[async_trait]
pub trait BatchAction: Send + Sync + 'static {
    /// Input handed to each attempt.
    type Payload: Clone + Send + Sync + 'static;
    /// Value produced on success.
    type Output: Send + 'static;

    /// Performs one attempt for `payload`.
    async fn execute(&self, payload: &Self::Payload) -> Result<Self::Output, ActionError>;
}

/// Adapter turning an async closure into a `BatchAction`.
pub struct FnAction<P, F> {
    f: F,
    _payload: PhantomData<fn(P)>,
}

/// Wraps `f` as a `BatchAction` receiving an owned clone of each payload.
pub fn action_fn<P, F>(f: F) -> FnAction<P, F> {
    FnAction {
        f,
        _payload: PhantomData,
    }
}

#[async_trait]
impl<P, F, Fut, T> BatchAction for FnAction<P, F>
where
    P: Clone + Send + Sync + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ActionError>> + Send + 'static,
    T: Send + 'static,
{
    type Payload = P;
    type Output = T;

    async fn execute(&self, payload: &P) -> Result<T, ActionError> {
        (self.f)(payload.clone()).await
    }
}

/// A single status transition of a work item.
#[derive(Debug, Clone, Copy)]
pub struct ItemEvent<'a> {
    pub index: usize,
    pub id: &'a str,
    pub from: ItemStatus,
    pub to: ItemStatus,
    /// Attempts started so far, including the current one.
    pub attempt: u32,
    pub error: Option<&'a ActionError>,
    /// Items running after this transition.
    pub running: usize,
}

/// Receives every item status transition, in order.
///
/// Called from the dispatch loop; implementations must not block.
pub trait BatchObserver: Send + Sync {
    fn on_event(&self, event: &ItemEvent<'_>);
}

impl<F> BatchObserver for F
where
    F: Fn(&ItemEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &ItemEvent<'_>) {
        self(event)
    }
}

/// Observer that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl BatchObserver for NoopObserver {
    fn on_event(&self, _event: &ItemEvent<'_>) {}
}

/// Cloneable handle for cancelling a running batch.
///
/// In-flight attempts finish; nothing new is dispatched or retried after
/// cancellation, and items still waiting are failed as cancelled.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// An item waiting out its retry delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Backoff {
    ready_at: Instant,
    index: usize,
    state: RetryState,
}

impl Ord for Backoff {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.ready_at, self.index).cmp(&(other.ready_at, other.index))
    }
}

impl PartialOrd for Backoff {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Runs batches of work items with bounded concurrency and retry.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    config: RunnerConfig,
}

impl BatchRunner {
    /// Creates a runner.
    ///
    /// # Errors
    ///
    /// Returns `BatchError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: RunnerConfig) -> Result<Self, BatchError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs every item to a terminal status without observation or cancellation.
    pub async fn run<A: BatchAction>(
        &self,
        queue: WorkQueue<A::Payload>,
        action: A,
    ) -> Result<BatchResult<A::Payload, A::Output>, BatchError> {
        self.run_with(queue, action, &NoopObserver, &CancelHandle::new())
            .await
    }

    /// Runs every item to a terminal status.
    ///
    /// Returns only once no item is `Pending` or `Running`. Per-item failures
    /// are recorded on the items; the only error is an empty batch.
    pub async fn run_with<A: BatchAction>(
        &self,
        queue: WorkQueue<A::Payload>,
        action: A,
        observer: &dyn BatchObserver,
        cancel: &CancelHandle,
    ) -> Result<BatchResult<A::Payload, A::Output>, BatchError> {
        if queue.is_empty() {
            return Err(BatchError::EmptyBatch);
        }

        let started = Instant::now();
        let name = self.config.name.as_str();
        let action = Arc::new(action);
        let mut items: Vec<WorkItem<A::Payload, A::Output>> = queue.into_items();

        info!(
            batch = name,
            items = items.len(),
            concurrency = self.config.concurrency,
            max_attempts = self.config.retry.max_attempts,
            "Batch started"
        );

        let mut ready: BinaryHeap<Reverse<usize>> = (0..items.len()).map(Reverse).collect();
        let mut waiting: BinaryHeap<Reverse<Backoff>> = BinaryHeap::new();
        let mut in_flight: JoinSet<Result<A::Output, ActionError>> = JoinSet::new();
        let mut task_items: HashMap<tokio::task::Id, usize> = HashMap::new();

        let mut cancel_rx = cancel.subscribe();
        let mut cancelled = *cancel_rx.borrow_and_update();
        let mut cancel_open = true;

        loop {
            // Observers may cancel from inside the loop; never dispatch past it.
            if !cancelled && *cancel_rx.borrow_and_update() {
                cancelled = true;
                info!(batch = name, in_flight = in_flight.len(), "Batch cancellation requested");
            }

            if cancelled {
                self.cancel_waiting(&mut items, &mut ready, &mut waiting, observer, in_flight.len());
            } else {
                while in_flight.len() < self.config.concurrency {
                    let Some(Reverse(index)) = ready.pop() else {
                        break;
                    };
                    let item = &mut items[index];
                    item.start_attempt();

                    let handle = in_flight.spawn(run_attempt(
                        Arc::clone(&action),
                        item.payload.clone(),
                        self.config.item_timeout,
                    ));
                    task_items.insert(handle.id(), index);

                    debug!(batch = name, item = %item.id, attempt = item.attempts, "Dispatched");
                    notify(observer, item, ItemStatus::Pending, in_flight.len());
                }
            }

            if in_flight.is_empty() && waiting.is_empty() && (ready.is_empty() || cancelled) {
                break;
            }

            let next_wake = waiting.peek().map(|Reverse(b)| b.ready_at);

            tokio::select! {
                Some(joined) = in_flight.join_next_with_id() => {
                    let (index, outcome) = match joined {
                        Ok((id, outcome)) => (task_items.remove(&id), outcome),
                        Err(join_err) => (
                            task_items.remove(&join_err.id()),
                            Err(ActionError::permanent(format!("action task failed: {}", join_err))),
                        ),
                    };
                    if let Some(index) = index {
                        self.complete(&mut items[index], outcome, cancelled, &mut waiting, observer, in_flight.len());
                    }
                }
                _ = tokio::time::sleep_until(next_wake.unwrap_or_else(Instant::now)), if next_wake.is_some() && !cancelled => {
                    let now = Instant::now();
                    while let Some(Reverse(backoff)) = waiting.peek().copied() {
                        if backoff.ready_at > now {
                            break;
                        }
                        waiting.pop();
                        debug!(
                            batch = name,
                            item = %items[backoff.index].id,
                            attempts = backoff.state.attempts,
                            delay_ms = backoff.state.next_delay.as_millis() as u64,
                            "Backoff elapsed, item eligible again"
                        );
                        ready.push(Reverse(backoff.index));
                    }
                }
                changed = cancel_rx.changed(), if cancel_open && !cancelled => {
                    match changed {
                        Ok(()) => {
                            if *cancel_rx.borrow_and_update() {
                                cancelled = true;
                                info!(batch = name, in_flight = in_flight.len(), "Batch cancellation requested");
                            }
                        }
                        Err(_) => cancel_open = false,
                    }
                }
            }
        }

        let result = BatchResult::from_items(items, started.elapsed());
        info!(
            batch = name,
            succeeded = result.succeeded,
            failed = result.failed,
            skipped = result.skipped,
            duration_ms = result.elapsed.as_millis() as u64,
            "Batch finished"
        );
        Ok(result)
    }

    /// Applies the outcome of a finished attempt.
    fn complete<P, T>(
        &self,
        item: &mut WorkItem<P, T>,
        outcome: Result<T, ActionError>,
        cancelled: bool,
        waiting: &mut BinaryHeap<Reverse<Backoff>>,
        observer: &dyn BatchObserver,
        running: usize,
    ) {
        let name = self.config.name.as_str();

        match outcome {
            Ok(output) => {
                item.succeed(output);
                info!(batch = name, item = %item.id, attempts = item.attempts, "Item succeeded");
            }
            Err(err) => {
                let decision = if cancelled {
                    RetryDecision::GiveUp
                } else {
                    self.config.retry.decide(&err, item.attempts)
                };

                match decision {
                    RetryDecision::Retry(state) => {
                        warn!(
                            batch = name,
                            item = %item.id,
                            attempt = item.attempts,
                            max_attempts = self.config.retry.max_attempts,
                            delay_ms = state.next_delay.as_millis() as u64,
                            error = %err,
                            "Attempt failed, will retry"
                        );
                        item.requeue(err);
                        waiting.push(Reverse(Backoff {
                            ready_at: Instant::now() + state.next_delay,
                            index: item.index,
                            state,
                        }));
                    }
                    RetryDecision::GiveUp => {
                        error!(
                            batch = name,
                            item = %item.id,
                            attempts = item.attempts,
                            error = %err,
                            "Item failed"
                        );
                        item.fail(err);
                    }
                }
            }
        }

        notify(observer, item, ItemStatus::Running, running);
    }

    /// Fails every item that has not started its next attempt.
    fn cancel_waiting<P, T>(
        &self,
        items: &mut [WorkItem<P, T>],
        ready: &mut BinaryHeap<Reverse<usize>>,
        waiting: &mut BinaryHeap<Reverse<Backoff>>,
        observer: &dyn BatchObserver,
        running: usize,
    ) {
        let mut indices: Vec<usize> = ready.drain().map(|Reverse(i)| i).collect();
        indices.extend(waiting.drain().map(|Reverse(b)| b.index));
        indices.sort_unstable();

        for index in indices {
            let item = &mut items[index];
            item.fail(ActionError::cancelled());
            debug!(batch = %self.config.name, item = %item.id, "Item cancelled");
            notify(observer, item, ItemStatus::Pending, running);
        }
    }
}

async fn run_attempt<A: BatchAction>(
    action: Arc<A>,
    payload: A::Payload,
    timeout: Option<Duration>,
) -> Result<A::Output, ActionError> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, action.execute(&payload)).await {
            Ok(result) => result,
            Err(_) => Err(ActionError::timeout(limit)),
        },
        None => action.execute(&payload).await,
    }
}

fn notify<P, T>(
    observer: &dyn BatchObserver,
    item: &WorkItem<P, T>,
    from: ItemStatus,
    running: usize,
) {
    observer.on_event(&ItemEvent {
        index: item.index,
        id: &item.id,
        from,
        to: item.status,
        attempt: item.attempts,
        error: item.last_error.as_ref(),
        running,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use std::sync::Mutex;

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts)
            .with_base_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(20))
    }

    #[test]
    fn test_runner_config_default() {
        let config = RunnerConfig::default();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.item_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_runner_rejects_zero_concurrency() {
        let err = BatchRunner::new(RunnerConfig::new(0)).unwrap_err();
        assert!(matches!(err, BatchError::InvalidConfig(_)));
    }

    #[test]
    fn test_runner_rejects_zero_timeout() {
        let config = RunnerConfig::new(1).with_item_timeout(Duration::ZERO);
        assert!(BatchRunner::new(config).is_err());
    }

    #[test]
    fn test_cancel_handle() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_cancelled());
        clone.cancel();
        assert!(handle.is_cancelled());
        clone.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_backoff_ordering() {
        let now = Instant::now();
        let state = RetryState {
            attempts: 1,
            next_delay: Duration::from_millis(1),
        };
        let early = Backoff {
            ready_at: now,
            index: 5,
            state,
        };
        let late = Backoff {
            ready_at: now + Duration::from_millis(10),
            index: 0,
            state,
        };
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(late));
        heap.push(Reverse(early));
        assert_eq!(heap.pop().map(|Reverse(b)| b.index), Some(5));
    }

    #[tokio::test]
    async fn test_dispatch_follows_submission_order() {
        let runner = BatchRunner::new(RunnerConfig::new(1)).expect("valid config");
        let queue = WorkQueue::new((0..6).map(|i| (format!("item-{}", i), i))).expect("non-empty");
        let order = Mutex::new(Vec::new());
        let observer = |event: &ItemEvent<'_>| {
            if event.to == ItemStatus::Running {
                order.lock().expect("lock").push(event.index);
            }
        };

        let result = runner
            .run_with(
                queue,
                action_fn(|i: usize| async move { Ok::<_, ActionError>(i * 2) }),
                &observer,
                &CancelHandle::new(),
            )
            .await
            .expect("batch runs");

        assert_eq!(result.succeeded, 6);
        assert_eq!(*order.lock().expect("lock"), vec![0, 1, 2, 3, 4, 5]);
        let outputs: Vec<usize> = result.successes().map(|(_, v)| *v).collect();
        assert_eq!(outputs, vec![0, 2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn test_timeout_is_retried_then_fails() {
        let config = RunnerConfig::new(2)
            .with_retry(fast_retry(2))
            .with_item_timeout(Duration::from_millis(20));
        let runner = BatchRunner::new(config).expect("valid config");
        let queue = WorkQueue::new(vec![("slow", ())]).expect("non-empty");

        let result = runner
            .run(
                queue,
                action_fn(|_: ()| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, ActionError>(())
                }),
            )
            .await
            .expect("batch runs");

        let item = &result.items[0];
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.attempts, 2);
        assert_eq!(item.last_error.as_ref().map(|e| e.kind), Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_timeout_not_retried_when_disabled() {
        let config = RunnerConfig::new(1)
            .with_retry(fast_retry(3).with_retry_timeouts(false))
            .with_item_timeout(Duration::from_millis(10));
        let runner = BatchRunner::new(config).expect("valid config");
        let queue = WorkQueue::new(vec![("slow", ())]).expect("non-empty");

        let result = runner
            .run(
                queue,
                action_fn(|_: ()| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, ActionError>(())
                }),
            )
            .await
            .expect("batch runs");

        assert_eq!(result.items[0].attempts, 1);
        assert_eq!(result.failed, 1);
    }

    #[tokio::test]
    async fn test_panicking_action_fails_item() {
        let runner = BatchRunner::new(RunnerConfig::new(2).with_retry(fast_retry(3)))
            .expect("valid config");
        let queue = WorkQueue::new(vec![("boom", true), ("fine", false)]).expect("non-empty");

        let result = runner
            .run(
                queue,
                action_fn(|explode: bool| async move {
                    if explode {
                        panic!("action exploded");
                    }
                    Ok::<_, ActionError>("ok")
                }),
            )
            .await
            .expect("batch runs");

        assert_eq!(result.items[0].status, ItemStatus::Failed);
        assert_eq!(result.items[0].attempts, 1);
        assert_eq!(
            result.items[0].last_error.as_ref().map(|e| e.kind),
            Some(ErrorKind::Permanent)
        );
        assert_eq!(result.items[1].status, ItemStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_everything() {
        let runner = BatchRunner::new(RunnerConfig::default()).expect("valid config");
        let queue = WorkQueue::new(vec![("a", ()), ("b", ())]).expect("non-empty");
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancelHandle::new();
        cancel.cancel();

        let counter = Arc::clone(&calls);
        let result = runner
            .run_with(
                queue,
                action_fn(move |_: ()| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, AtomicOrdering::SeqCst);
                        Ok::<_, ActionError>(())
                    }
                }),
                &NoopObserver,
                &cancel,
            )
            .await
            .expect("batch runs");

        assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(result.failed, 2);
        assert_eq!(result.skipped, 2);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_fails_waiting_item() {
        let config = RunnerConfig::new(1).with_retry(
            RetryPolicy::new(5)
                .with_base_delay(Duration::from_secs(10))
                .with_max_delay(Duration::from_secs(10)),
        );
        let runner = BatchRunner::new(config).expect("valid config");
        let queue = WorkQueue::new(vec![("flaky", ())]).expect("non-empty");
        let cancel = CancelHandle::new();
        let trigger = cancel.clone();
        let observer = move |event: &ItemEvent<'_>| {
            if event.from == ItemStatus::Running && event.to == ItemStatus::Pending {
                trigger.cancel();
            }
        };

        let started = std::time::Instant::now();
        let result = runner
            .run_with(
                queue,
                action_fn(|_: ()| async { Err::<(), _>(ActionError::transient("503")) }),
                &observer,
                &cancel,
            )
            .await
            .expect("batch runs");

        assert!(started.elapsed() < Duration::from_secs(5));
        let item = &result.items[0];
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.attempts, 1);
        assert_eq!(item.last_error.as_ref().map(|e| e.kind), Some(ErrorKind::Cancelled));
        // Attempted once, so not counted as skipped
        assert_eq!(result.skipped, 0);
    }
}
