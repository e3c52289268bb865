//! Retry of transient engine failures.
//!
//! Cloud control planes fail transiently: throttling, eventual consistency
//! between resource creation and visibility, flaky provider downloads. An
//! engine command is retried only when its output contains one of the
//! substrings in [`DEFAULT_RETRYABLE_ERRORS`]; anything else fails immediately.
//!
//! Backoff strategy:
//! - Initial delay: the configured time between retries
//! - Exponential multiplier: 2x
//! - Delay cap: [`MAX_RETRY_DELAY`]
//! - Attempts: 1 + `max_retries`

use crate::engine::EngineError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Upper bound for a single backoff delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Engine output substrings known to indicate a transient failure.
pub const DEFAULT_RETRYABLE_ERRORS: &[&str] = &[
    // Network flakiness
    "RequestError: send request failed",
    "connection reset by peer",
    "TLS handshake timeout",
    "i/o timeout",
    // Provider installation
    "Error installing provider",
    "Failed to query available provider packages",
    "timeout while waiting for plugin to start",
    // Throttling
    "429 Too Many Requests",
    "StatusCode=429",
    "TooManyRequests",
    "RetryableError",
    // Eventual consistency
    "timeout while waiting for state to become",
    "ResourceGroupNotFound",
    "PrincipalNotFound",
    "AnotherOperationInProgress",
    "Error acquiring the state lock",
];

/// Retry policy for one engine command.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub time_between_retries: Duration,
    pub retryable_errors: Vec<String>,
}

impl RetryPolicy {
    /// Policy with the default allow-list.
    pub fn new(max_retries: u32, time_between_retries: Duration) -> Self {
        Self {
            max_retries,
            time_between_retries,
            retryable_errors: DEFAULT_RETRYABLE_ERRORS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            time_between_retries: Duration::ZERO,
            retryable_errors: Vec::new(),
        }
    }

    /// First allow-listed substring found in `output`, if any.
    pub fn matching_error(&self, output: &str) -> Option<&str> {
        self.retryable_errors
            .iter()
            .map(String::as_str)
            .find(|pattern| output.contains(pattern))
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.time_between_retries
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY)
    }
}

/// Result of a retried engine command.
#[derive(Debug)]
pub struct RetryFailure {
    /// Error from the last attempt.
    pub error: EngineError,
    /// Number of attempts made.
    pub attempts: u32,
    /// Whether the last error was still retryable (budget exhausted).
    pub exhausted: bool,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent.
pub async fn with_retries<F, Fut, T>(
    description: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let Some(pattern) = policy.matching_error(error.output()) else {
            return Err(RetryFailure {
                error,
                attempts,
                exhausted: false,
            });
        };

        if attempts > policy.max_retries {
            return Err(RetryFailure {
                error,
                attempts,
                exhausted: true,
            });
        }

        let delay = policy.delay_for(attempts);
        warn!(
            target: "infra_tests.retry",
            operation = description,
            attempt = attempts,
            max_retries = policy.max_retries,
            matched = pattern,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Transient engine error, will retry"
        );

        sleep(delay).await;
    }
}
