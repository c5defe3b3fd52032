//! Failure classification and retry backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::BatchError;

/// Default maximum number of attempts per item (first try included).
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff.
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Default cap on a single backoff delay.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retry-safe: rate limiting, transport hiccup, 5xx.
    Transient,
    /// Retrying cannot help: invalid payload, authorization failure.
    Permanent,
    /// The attempt exceeded the per-item timeout.
    Timeout,
    /// The batch was cancelled before the item could finish.
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Permanent => write!(f, "permanent"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Error produced by a single attempt of a batch action.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
pub struct ActionError {
    /// How the runner should treat the failure.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl ActionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("attempt timed out after {}ms", after.as_millis()),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "batch cancelled before completion")
    }
}

/// Unclassified failures are never retried.
impl From<anyhow::Error> for ActionError {
    fn from(err: anyhow::Error) -> Self {
        ActionError::permanent(format!("{:#}", err))
    }
}

impl From<std::io::Error> for ActionError {
    fn from(err: std::io::Error) -> Self {
        ActionError::permanent(format!("IO error: {}", err))
    }
}

/// Transient retry bookkeeping for one item between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far.
    pub attempts: u32,
    /// Delay before the item becomes eligible for dispatch again.
    pub next_delay: Duration,
}

/// Outcome of consulting the retry policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue the item once the delay has elapsed.
    Retry(RetryState),
    /// The failure is terminal.
    GiveUp,
}

/// Decides whether failed attempts are retried and how long to wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum attempts per item, first try included.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each later retry.
    #[serde(with = "duration_ms", rename = "base_delay_ms")]
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    #[serde(with = "duration_ms", rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Whether timeouts are retried like transient failures.
    pub retry_timeouts: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            retry_timeouts: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget and default delays.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets whether timeouts are retried.
    pub fn with_retry_timeouts(mut self, retry: bool) -> Self {
        self.retry_timeouts = retry;
        self
    }

    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns `BatchError::InvalidConfig` for a zero attempt budget or a
    /// base delay larger than the cap.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.max_attempts == 0 {
            return Err(BatchError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(BatchError::InvalidConfig(format!(
                "base delay ({}ms) exceeds max delay ({}ms)",
                self.base_delay.as_millis(),
                self.max_delay.as_millis()
            )));
        }
        Ok(())
    }

    /// Delay after the given attempt: `base × 2^(attempt-1)`, capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Returns whether an error of this kind may be retried at all.
    pub fn is_retryable(&self, error: &ActionError) -> bool {
        match error.kind {
            ErrorKind::Transient => true,
            ErrorKind::Timeout => self.retry_timeouts,
            ErrorKind::Permanent | ErrorKind::Cancelled => false,
        }
    }

    /// Decides what happens after attempt number `attempts` failed with `error`.
    pub fn decide(&self, error: &ActionError, attempts: u32) -> RetryDecision {
        if self.is_retryable(error) && attempts < self.max_attempts {
            RetryDecision::Retry(RetryState {
                attempts,
                next_delay: self.backoff_delay(attempts),
            })
        } else {
            RetryDecision::GiveUp
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert!(policy.retry_timeouts);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let policy = RetryPolicy::new(10)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(1000));

        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(800));
        assert_eq!(policy.backoff_delay(5), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(64), Duration::from_millis(1000));
    }

    #[test]
    fn test_permanent_never_retries() {
        let policy = RetryPolicy::new(5);
        let err = ActionError::permanent("bad prompt");
        assert_eq!(policy.decide(&err, 1), RetryDecision::GiveUp);
    }

    #[test]
    fn test_transient_retries_until_exhausted() {
        let policy = RetryPolicy::new(3).with_base_delay(Duration::from_millis(10));
        let err = ActionError::transient("rate limited");

        assert_eq!(
            policy.decide(&err, 1),
            RetryDecision::Retry(RetryState {
                attempts: 1,
                next_delay: Duration::from_millis(10)
            })
        );
        assert_eq!(
            policy.decide(&err, 2),
            RetryDecision::Retry(RetryState {
                attempts: 2,
                next_delay: Duration::from_millis(20)
            })
        );
        assert_eq!(policy.decide(&err, 3), RetryDecision::GiveUp);
    }

    #[test]
    fn test_timeout_retry_configurable() {
        let err = ActionError::timeout(Duration::from_secs(5));
        assert!(RetryPolicy::new(3).is_retryable(&err));
        assert!(!RetryPolicy::new(3)
            .with_retry_timeouts(false)
            .is_retryable(&err));
        assert!(!RetryPolicy::new(3).is_retryable(&ActionError::cancelled()));
    }

    #[test]
    fn test_validate_rejects_bad_policy() {
        assert!(RetryPolicy::new(0).validate().is_err());
        let policy = RetryPolicy::new(3)
            .with_base_delay(Duration::from_secs(60))
            .with_max_delay(Duration::from_secs(1));
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_unclassified_errors_are_permanent() {
        let err: ActionError = anyhow::anyhow!("something odd").into();
        assert_eq!(err.kind, ErrorKind::Permanent);
        assert!(err.message.contains("something odd"));
    }

    #[test]
    fn test_policy_serde_uses_millis() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": 4, "base_delay_ms": 250}"#)
                .expect("valid policy json");
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }
}
