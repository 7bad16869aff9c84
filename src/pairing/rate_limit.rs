//! Per-caller attempt throttling for code validation.
//!
//! A sliding-window log: each caller key keeps the instants of its recent
//! attempts; an attempt is allowed while fewer than `max_attempts` fall
//! inside the window. The in-memory limiter is process-local and resets on
//! restart. Multi-instance deployments plug a shared counter in behind
//! [`AttemptLimiter`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Default attempts allowed per window.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default rolling window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Tracked keys above which idle entries are swept, at most once per window.
const SWEEP_THRESHOLD: usize = 10_000;

/// Outcome of asking for an attempt slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

/// Bounded-window attempt counter keyed by caller identity.
#[async_trait]
pub trait AttemptLimiter: Send + Sync {
    /// Record an attempt for `key` if the window has room.
    async fn try_acquire(&self, key: &str) -> LimitDecision;
}

#[derive(Default)]
struct AttemptLog {
    by_key: HashMap<String, VecDeque<Instant>>,
    last_sweep: Option<Instant>,
}

/// Single-process sliding-window limiter.
#[derive(Clone)]
pub struct InMemoryAttemptLimiter {
    attempts: Arc<Mutex<AttemptLog>>,
    max_attempts: u32,
    window: Duration,
    sweep_threshold: usize,
}

impl InMemoryAttemptLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            attempts: Arc::new(Mutex::new(AttemptLog::default())),
            max_attempts,
            window,
            sweep_threshold: SWEEP_THRESHOLD,
        }
    }

    async fn acquire_at(&self, key: &str, now: Instant) -> LimitDecision {
        let mut guard = self.attempts.lock().await;
        let attempts = &mut *guard;

        let sweep_due = attempts
            .last_sweep
            .is_none_or(|at| now.saturating_duration_since(at) >= self.window);
        if attempts.by_key.len() > self.sweep_threshold && sweep_due {
            let window = self.window;
            let before = attempts.by_key.len();
            attempts.by_key.retain(|_, log| {
                log.back()
                    .is_some_and(|last| now.saturating_duration_since(*last) < window)
            });
            attempts.last_sweep = Some(now);
            tracing::debug!(
                swept = before - attempts.by_key.len(),
                tracked = attempts.by_key.len(),
                "Swept idle attempt logs"
            );
        }

        let log = attempts.by_key.entry(key.to_string()).or_default();
        while let Some(oldest) = log.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                log.pop_front();
            } else {
                break;
            }
        }

        if log.len() as u32 >= self.max_attempts {
            let retry_after = log
                .front()
                .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(self.window);
            return LimitDecision::Limited { retry_after };
        }

        log.push_back(now);
        LimitDecision::Allowed {
            remaining: self.max_attempts - log.len() as u32,
        }
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.attempts.lock().await.by_key.len()
    }
}

impl Default for InMemoryAttemptLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_WINDOW)
    }
}

#[async_trait]
impl AttemptLimiter for InMemoryAttemptLimiter {
    async fn try_acquire(&self, key: &str) -> LimitDecision {
        self.acquire_at(key, Instant::now()).await
    }
}

/// Limiter that never throttles. For trusted internal callers and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlimitedAttempts;

#[async_trait]
impl AttemptLimiter for UnlimitedAttempts {
    async fn try_acquire(&self, _key: &str) -> LimitDecision {
        LimitDecision::Allowed {
            remaining: u32::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sixth_attempt_in_window_is_limited() {
        let limiter = InMemoryAttemptLimiter::default();
        let start = Instant::now();

        for i in 0..5 {
            let decision = limiter
                .acquire_at("parent-1", start + Duration::from_secs(i))
                .await;
            assert_eq!(
                decision,
                LimitDecision::Allowed {
                    remaining: 4 - i as u32
                }
            );
        }

        let decision = limiter
            .acquire_at("parent-1", start + Duration::from_secs(10))
            .await;
        assert_eq!(
            decision,
            LimitDecision::Limited {
                retry_after: Duration::from_secs(50)
            }
        );
    }

    #[tokio::test]
    async fn test_window_rolls_over() {
        let limiter = InMemoryAttemptLimiter::default();
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire_at("parent-1", start).await;
        }
        assert!(matches!(
            limiter.acquire_at("parent-1", start).await,
            LimitDecision::Limited { .. }
        ));

        let later = start + DEFAULT_WINDOW;
        assert!(matches!(
            limiter.acquire_at("parent-1", later).await,
            LimitDecision::Allowed { .. }
        ));
    }

    #[tokio::test]
    async fn test_limited_attempts_do_not_extend_window() {
        let limiter = InMemoryAttemptLimiter::new(1, Duration::from_secs(10));
        let start = Instant::now();

        limiter.acquire_at("k", start).await;
        for s in 1..10 {
            assert!(matches!(
                limiter.acquire_at("k", start + Duration::from_secs(s)).await,
                LimitDecision::Limited { .. }
            ));
        }
        assert!(matches!(
            limiter.acquire_at("k", start + Duration::from_secs(10)).await,
            LimitDecision::Allowed { .. }
        ));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = InMemoryAttemptLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(matches!(
            limiter.acquire_at("a", now).await,
            LimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.acquire_at("b", now).await,
            LimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.acquire_at("a", now).await,
            LimitDecision::Limited { .. }
        ));
        assert_eq!(limiter.tracked_keys().await, 2);
    }

    #[tokio::test]
    async fn test_idle_sweep_runs_at_most_once_per_window() {
        let limiter = InMemoryAttemptLimiter {
            sweep_threshold: 2,
            ..InMemoryAttemptLimiter::new(5, Duration::from_secs(60))
        };
        let start = Instant::now();

        for key in ["a", "b", "c"] {
            limiter.acquire_at(key, start).await;
        }
        assert_eq!(limiter.attempts.lock().await.last_sweep, None);

        // Over the threshold but every key is live: swept once, nothing removed.
        limiter.acquire_at("d", start).await;
        assert_eq!(limiter.attempts.lock().await.last_sweep, Some(start));
        assert_eq!(limiter.tracked_keys().await, 4);

        // Inside the same window no further pass happens.
        let soon = start + Duration::from_secs(30);
        limiter.acquire_at("e", soon).await;
        assert_eq!(limiter.attempts.lock().await.last_sweep, Some(start));
        assert_eq!(limiter.tracked_keys().await, 5);

        // A window later the idle keys go.
        let later = start + Duration::from_secs(61);
        limiter.acquire_at("f", later).await;
        assert_eq!(limiter.attempts.lock().await.last_sweep, Some(later));
        assert_eq!(limiter.tracked_keys().await, 2);
    }

    #[tokio::test]
    async fn test_real_clock_window() {
        let limiter = InMemoryAttemptLimiter::new(2, Duration::from_millis(50));
        assert!(matches!(limiter.try_acquire("p").await, LimitDecision::Allowed { .. }));
        assert!(matches!(limiter.try_acquire("p").await, LimitDecision::Allowed { .. }));
        assert!(matches!(limiter.try_acquire("p").await, LimitDecision::Limited { .. }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(limiter.try_acquire("p").await, LimitDecision::Allowed { .. }));
    }

    #[tokio::test]
    async fn test_unlimited_never_limits() {
        let limiter = UnlimitedAttempts;
        for _ in 0..100 {
            assert!(matches!(limiter.try_acquire("x").await, LimitDecision::Allowed { .. }));
        }
    }
}
