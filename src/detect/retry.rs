//! Retry policy
//!
//! One strategy object reused at every I/O site in the orchestrator:
//! bounded attempts, fixed or exponential delay, an allowlist of
//! operation classes, and a predicate that vetoes retries for error
//! classes that will not heal (bad selectors, closed targets).

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::config::{RetryOperation, RetryOptions};
use crate::error::is_retryable_message;

use super::cancel::CancelToken;

/// Retry strategy derived from [`RetryOptions`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    enabled: bool,
    max_attempts: u32,
    base_delay: Duration,
    exponential_backoff: bool,
    operations: Vec<RetryOperation>,
}

impl From<&RetryOptions> for RetryPolicy {
    fn from(options: &RetryOptions) -> Self {
        Self {
            enabled: options.enabled,
            max_attempts: options.max_attempts.max(1),
            base_delay: Duration::from_millis(options.delay_ms),
            exponential_backoff: options.exponential_backoff,
            operations: options.operations.clone(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries (single attempt per operation).
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_attempts: 1,
            base_delay: Duration::ZERO,
            exponential_backoff: false,
            operations: Vec::new(),
        }
    }

    pub fn covers(&self, operation: RetryOperation) -> bool {
        self.enabled && self.operations.contains(&operation)
    }

    /// Delay before attempt `n` (1-based; attempt 1 has no delay).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        if self.exponential_backoff {
            let factor = 2u32.saturating_pow(attempt - 2);
            self.base_delay.saturating_mul(factor)
        } else {
            self.base_delay
        }
    }

    /// Run `operation` with this policy.
    ///
    /// A non-retryable error, an operation class outside the allowlist,
    /// or an exhausted attempt budget all surface the last error to the
    /// caller — which, for submission steps, means falling through to
    /// the next strategy in the chain.
    pub async fn run<T, F, Fut>(
        &self,
        operation: RetryOperation,
        label: &str,
        cancel: &CancelToken,
        mut attempt_fn: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let budget = if self.covers(operation) {
            self.max_attempts
        } else {
            1
        };

        let mut last_err = None;
        for attempt in 1..=budget {
            if cancel.is_cancelled() {
                anyhow::bail!("{label}: cancelled");
            }
            let delay = self.delay_before(attempt);
            if !delay.is_zero() && !cancel.sleep(delay).await {
                anyhow::bail!("{label}: cancelled during backoff");
            }

            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let retryable = is_retryable_message(&e.to_string());
                    debug!("{label}: attempt {attempt}/{budget} failed (retryable={retryable}): {e:#}");
                    if !retryable {
                        return Err(e);
                    }
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{label}: no attempts executed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32, exponential: bool) -> RetryPolicy {
        RetryPolicy::from(&RetryOptions {
            enabled: true,
            max_attempts,
            delay_ms: 1,
            exponential_backoff: exponential,
            operations: vec![RetryOperation::Input],
        })
    }

    #[test]
    fn backoff_schedule_doubles() {
        let p = policy(4, true);
        assert_eq!(p.delay_before(1), Duration::ZERO);
        assert_eq!(p.delay_before(2), Duration::from_millis(1));
        assert_eq!(p.delay_before(3), Duration::from_millis(2));
        assert_eq!(p.delay_before(4), Duration::from_millis(4));

        let fixed = policy(4, false);
        assert_eq!(fixed.delay_before(3), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let p = policy(3, false);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<u32> = p
            .run(RetryOperation::Input, "fill", &CancelToken::never(), move || {
                let calls = calls2.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        anyhow::bail!("element not visible yet")
                    }
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn uncovered_operation_gets_one_attempt() {
        let p = policy(5, false);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<()> = p
            .run(
                RetryOperation::Navigation,
                "goto",
                &CancelToken::never(),
                move || {
                    let calls = calls2.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        anyhow::bail!("navigation timeout")
                    }
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_retryable_error_short_circuits() {
        let p = policy(5, false);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<()> = p
            .run(RetryOperation::Input, "fill", &CancelToken::never(), move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("SyntaxError in selector")
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "predicate vetoed the retry");
    }

    #[tokio::test]
    async fn exhausted_budget_returns_last_error() {
        let p = policy(2, false);
        let result: Result<()> = p
            .run(RetryOperation::Input, "fill", &CancelToken::never(), || async {
                anyhow::bail!("timeout waiting for element")
            })
            .await;
        let message = result.unwrap_err().to_string();
        assert!(message.contains("timeout"));
    }
}
