//! Bounded retry with exponential backoff for client calls.
//!
//! Only failures that [`ClientError::is_transient`] accepts are retried:
//! 5xx, 429, transport failures, and the `integrity_race` conflict.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Retry behavior for one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Base delay for exponential backoff (milliseconds).
    pub base_delay_ms: u64,
    /// Maximum delay cap (milliseconds).
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0), added on top of the capped delay.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 10_000,
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1)`, capped at `max_delay_ms`, plus up to
    /// `jitter_factor` of that on top. A server-provided `retry_after`
    /// raises the result to at least that value.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let exponential = self.base_delay_ms.saturating_mul(1u64 << exponent);
        let capped = exponential.min(self.max_delay_ms);

        let jitter_range = (capped as f64 * self.jitter_factor.clamp(0.0, 1.0)) as u64;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..=jitter_range)
        } else {
            0
        };

        let delay = Duration::from_millis(capped + jitter);
        match retry_after {
            Some(floor) if floor > delay => floor,
            _ => delay,
        }
    }
}

fn retry_after_hint(error: &ClientError) -> Option<Duration> {
    match error {
        ClientError::Api { retry_after, .. } => *retry_after,
        _ => None,
    }
}

/// Run `operation` until it succeeds, fails permanently, or the policy's
/// attempts are spent. The last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation = operation_name, attempt, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt, retry_after_hint(&e));
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %e,
                        "Retries exhausted"
                    );
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::ErrorCode;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 10,
            jitter_factor: 0.0,
        }
    }

    fn api(status: u16, code: ErrorCode) -> ClientError {
        ClientError::Api {
            operation: "test".to_string(),
            status,
            code,
            message: "boom".to_string(),
            retry_after: None,
        }
    }

    #[test]
    fn test_delay_exponential_without_jitter() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.delay_for(1, None), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, None), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3, None), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4, None), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_capped() {
        let policy = RetryPolicy {
            max_attempts: 20,
            base_delay_ms: 1000,
            max_delay_ms: 5000,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.delay_for(10, None), Duration::from_millis(5000));
        // Large attempt numbers must not overflow.
        assert_eq!(policy.delay_for(u32::MAX, None), Duration::from_millis(5000));
    }

    #[test]
    fn test_delay_jitter_range() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_factor: 0.5,
        };
        for _ in 0..100 {
            let delay = policy.delay_for(1, None).as_millis();
            assert!((1000..=1500).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_retry_after_raises_delay() {
        let policy = fast_policy();
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        // A hint shorter than the backoff does not lower it.
        let slow = RetryPolicy {
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            ..fast_policy()
        };
        assert_eq!(
            slow.delay_for(1, Some(Duration::from_millis(10))),
            Duration::from_millis(500)
        );
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = with_retry(&fast_policy(), "op", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ClientError>(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = with_retry(&fast_policy(), "op", || {
            let c = Arc::clone(&c);
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(api(503, ErrorCode::Internal))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts_and_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<(), _> = with_retry(&fast_policy(), "op", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(api(409, ErrorCode::IntegrityRace))
            }
        })
        .await;
        assert_eq!(result.unwrap_err().code(), Some(ErrorCode::IntegrityRace));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        for error in [
            api(400, ErrorCode::InvalidArgument),
            api(403, ErrorCode::Forbidden),
            api(409, ErrorCode::FailedPrecondition),
        ] {
            let calls = Arc::new(AtomicU32::new(0));
            let c = Arc::clone(&calls);
            let code = error.code();
            let mut slot = Some(error);
            let result: Result<(), _> = with_retry(&fast_policy(), "op", || {
                c.fetch_add(1, Ordering::SeqCst);
                let e = slot.take().unwrap_or(ClientError::Unauthenticated);
                async move { Err(e) }
            })
            .await;
            assert_eq!(result.unwrap_err().code(), code);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_no_retry_policy_makes_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<(), _> = with_retry(&RetryPolicy::no_retry(), "op", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(api(500, ErrorCode::Internal))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
