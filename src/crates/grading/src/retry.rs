//! Named retry policies (spec §5) layered on top of the graph engine's
//! generic exponential-backoff [`RetryPolicy`].
//!
//! The teacher's `RetryPolicy` has no per-attempt timeout and no concept of
//! "non-retryable" errors; both are needed here, so this module wraps it
//! rather than widening the shared type.

use std::time::Duration;

use langgraph_core::retry::RetryPolicy;
use tokio::time::timeout;

use crate::error::GradingError;

/// A named retry policy: the engine's backoff schedule plus a per-attempt
/// timeout and a predicate distinguishing retryable from terminal errors.
#[derive(Clone)]
pub struct GradingRetryPolicy {
    pub name: &'static str,
    pub backoff: RetryPolicy,
    pub per_attempt_timeout: Option<Duration>,
}

impl GradingRetryPolicy {
    /// (1s, 2.0, 60s, 3 attempts, no timeout).
    pub fn default_policy() -> Self {
        Self {
            name: "DEFAULT",
            backoff: RetryPolicy::new(3)
                .with_initial_interval(1.0)
                .with_backoff_factor(2.0)
                .with_max_interval(60.0),
            per_attempt_timeout: None,
        }
    }

    /// (2s, 2.0, 120s, 5 attempts, 300s per-attempt timeout).
    pub fn llm_api() -> Self {
        Self {
            name: "LLM_API",
            backoff: RetryPolicy::new(5)
                .with_initial_interval(2.0)
                .with_backoff_factor(2.0)
                .with_max_interval(120.0),
            per_attempt_timeout: Some(Duration::from_secs(300)),
        }
    }

    /// (0.5s, 1.0, 1s, 1 attempt, 30s timeout).
    pub fn fast_fail() -> Self {
        Self {
            name: "FAST_FAIL",
            backoff: RetryPolicy::new(1)
                .with_initial_interval(0.5)
                .with_backoff_factor(1.0)
                .with_max_interval(1.0),
            per_attempt_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// (0.5s, 1.5, 10s, 5 attempts, 60s timeout).
    pub fn persistence() -> Self {
        Self {
            name: "PERSISTENCE",
            backoff: RetryPolicy::new(5)
                .with_initial_interval(0.5)
                .with_backoff_factor(1.5)
                .with_max_interval(10.0),
            per_attempt_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Runs `op` under `policy`, retrying per the backoff schedule unless
/// `is_retryable` rejects the error or a per-attempt timeout elapses on a
/// non-retryable class (a timeout is itself treated as retryable).
///
/// `LLM_API`'s documented behavior ("non-retryable on validation errors") is
/// expressed by the caller's `is_retryable` predicate, e.g. rejecting
/// `GradingError::InvalidScoringResponse`.
pub async fn with_retry<F, Fut, T>(
    policy: &GradingRetryPolicy,
    operation: &str,
    is_retryable: impl Fn(&GradingError) -> bool,
    mut op: F,
) -> Result<T, GradingError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, GradingError>>,
{
    let mut attempt = 0usize;
    loop {
        let call = op();
        let outcome = match policy.per_attempt_timeout {
            Some(dur) => match timeout(dur, call).await {
                Ok(res) => res,
                Err(_) => Err(GradingError::invalid_scoring_response(
                    operation,
                    format!("timed out after {:?}", dur),
                )),
            },
            None => call.await,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                let retryable = is_retryable(&err);
                if !retryable || !policy.backoff.should_retry(attempt) {
                    tracing::warn!(
                        operation,
                        policy = policy.name,
                        attempt,
                        retryable,
                        error = %err,
                        "retry exhausted or error is terminal"
                    );
                    return Err(GradingError::ScoringServiceExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                let delay = policy.backoff.calculate_delay(attempt - 1);
                tracing::debug!(
                    operation,
                    policy = policy.name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling retry"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let policy = GradingRetryPolicy::fast_fail();
        let calls = AtomicUsize::new(0);
        let result: Result<i32, GradingError> = with_retry(
            &GradingRetryPolicy {
                backoff: langgraph_core::retry::RetryPolicy::new(3)
                    .with_initial_interval(0.0)
                    .with_max_interval(0.0),
                ..policy
            },
            "test_op",
            |_| true,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(GradingError::invalid_scoring_response("test_op", "not yet"))
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let policy = GradingRetryPolicy {
            backoff: langgraph_core::retry::RetryPolicy::new(5)
                .with_initial_interval(0.0)
                .with_max_interval(0.0),
            ..GradingRetryPolicy::llm_api()
        };
        let calls = AtomicUsize::new(0);
        let result: Result<i32, GradingError> = with_retry(
            &policy,
            "validate",
            |_| false,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(GradingError::invalid_scoring_response("validate", "bad shape")) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
