//! Bounded, exponentially backed-off retries around a single remote call.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::classify::ErrorClassifier;
use crate::error::{ClassifiedError, ConfigError, ErrorKind, Result, SourceError};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    /// Deadline for one attempt.
    pub timeout: Duration,
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(15_000),
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryOptions {
    /// Delay slept after failed attempt `attempt` (0-based):
    /// `base_delay * backoff_multiplier^attempt`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let nanos = (self.base_delay.as_nanos() as f64 * factor).round();
        if !nanos.is_finite() || nanos >= u64::MAX as f64 {
            return Duration::from_nanos(u64::MAX);
        }
        Duration::from_nanos(nanos as u64)
    }

    /// Sum of every backoff delay a fully failing call sleeps through.
    #[must_use]
    pub fn total_backoff(&self) -> Duration {
        (0..self.max_retries).map(|n| self.delay_for_attempt(n)).sum()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidRetryOptions(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 1.0 {
            return Err(ConfigError::InvalidRetryOptions(format!(
                "backoff multiplier must be greater than 1 (got {})",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Runs one logical remote call: sequential attempts, each under the timeout,
/// separated by growing delays, stopping at the first success, the first
/// non-retryable failure, or when the budget is spent.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    options: RetryOptions,
    classifier: ErrorClassifier,
}

impl RetryExecutor {
    #[must_use]
    pub fn new(options: RetryOptions, classifier: ErrorClassifier) -> Self {
        Self {
            options,
            classifier,
        }
    }

    #[must_use]
    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    #[must_use]
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Executes `operation`. With `retry` unset the call gets exactly one
    /// attempt whatever the failure.
    ///
    /// Cancelling `cancel` abandons the in-flight attempt or backoff sleep and
    /// returns a `Cancelled` error.
    pub async fn execute<T, F, Fut>(
        &self,
        table: &str,
        retry: bool,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, SourceError>>,
    {
        let max_attempts = if retry {
            self.options.max_retries.saturating_add(1)
        } else {
            1
        };
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(table, attempt));
            }
            attempt += 1;
            debug!(table, attempt, max_attempts, "remote attempt");

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled(table, attempt)),
                result = tokio::time::timeout(self.options.timeout, operation()) => result,
            };

            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) => SourceError::Timeout(self.options.timeout),
            };

            let kind = self.classifier.classify(&err);
            if !kind.is_retryable() || attempt >= max_attempts {
                if kind.is_retryable() && retry {
                    warn!(table, attempts = attempt, %kind, error = %err, "retry budget exhausted");
                }
                return Err(ClassifiedError::from_source(kind, table, &err, attempt));
            }

            let delay = self.options.delay_for_attempt(attempt - 1);
            warn!(
                table,
                attempt,
                %kind,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "remote call failed, backing off"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled(table, attempt)),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn cancelled(table: &str, attempts: u32) -> ClassifiedError {
    let mut err = ClassifiedError::new(ErrorKind::Cancelled, table, "call cancelled by caller");
    err.attempts = attempts;
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorPayload;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn executor(options: RetryOptions) -> RetryExecutor {
        RetryExecutor::new(options, ErrorClassifier::default())
    }

    fn validation_error() -> SourceError {
        SourceError::Status {
            status: 400,
            payload: ErrorPayload {
                code: Some("23502".to_string()),
                message: Some("null value in column \"title\"".to_string()),
                details: None,
                hint: None,
            },
        }
    }

    #[test]
    fn test_delay_series() {
        let options = RetryOptions::default();
        assert_eq!(options.delay_for_attempt(0), Duration::from_millis(200));
        assert_eq!(options.delay_for_attempt(1), Duration::from_millis(400));
        assert_eq!(options.delay_for_attempt(2), Duration::from_millis(800));
        assert_eq!(options.total_backoff(), Duration::from_millis(1400));
    }

    #[test]
    fn test_validate_options() {
        assert!(RetryOptions::default().validate().is_ok());
        let flat = RetryOptions {
            backoff_multiplier: 1.0,
            ..RetryOptions::default()
        };
        assert!(flat.validate().is_err());
        let no_timeout = RetryOptions {
            timeout: Duration::ZERO,
            ..RetryOptions::default()
        };
        assert!(no_timeout.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failures_use_full_budget() {
        let exec = executor(RetryOptions::default());
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = Arc::clone(&calls);
        let result: Result<()> = exec
            .execute("recipes", true, &CancellationToken::new(), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::Transport("connection refused".to_string())) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Connection);
        assert_eq!(err.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1400), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1450), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_use_full_budget() {
        let options = RetryOptions {
            timeout: Duration::from_secs(1),
            ..RetryOptions::default()
        };
        let exec = executor(options);
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = Arc::clone(&calls);
        let result: Result<()> = exec
            .execute("recipes", true, &CancellationToken::new(), || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::future::pending::<std::result::Result<(), SourceError>>()
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Connection);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        // Four timed-out attempts plus 200 + 400 + 800 ms of backoff.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(5400), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(5450), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_error_is_not_retried() {
        let exec = executor(RetryOptions::default());
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result: Result<()> = exec
            .execute("recipes", true, &CancellationToken::new(), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(validation_error()) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let exec = executor(RetryOptions::default());
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result = exec
            .execute("recipes", true, &CancellationToken::new(), || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SourceError::Status {
                            status: 503,
                            payload: ErrorPayload::with_message("unavailable"),
                        })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_disabled_makes_one_attempt() {
        let exec = executor(RetryOptions::default());
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result: Result<()> = exec
            .execute("recipes", false, &CancellationToken::new(), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::Transport("reset".to_string())) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::Connection);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_the_retry_sequence() {
        let exec = executor(RetryOptions::default());
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let counter = Arc::clone(&calls);
        let trigger = token.clone();
        let result: Result<()> = exec
            .execute("recipes", true, &token, || {
                counter.fetch_add(1, Ordering::SeqCst);
                trigger.cancel();
                async { Err(SourceError::Transport("refused".to_string())) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_attempt() {
        let exec = executor(RetryOptions::default());
        let token = CancellationToken::new();
        token.cancel();

        let result: Result<()> = exec
            .execute("recipes", true, &token, || async { Ok(()) })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(err.attempts, 0);
    }
}
