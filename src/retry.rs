//! Retry with bounded exponential backoff
//!
//! Broker and AI calls fail transiently all the time (timeouts, rate limits,
//! dropped connections), and several bot processes tend to hit the same
//! upstream at once. The executor retries only failures the caller classifies
//! as retryable, backs off exponentially between attempts, and jitters the
//! delay so independent processes do not retry in lockstep.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Retry behaviour for one class of operation
///
/// Immutable once built; share one value per upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first call
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Ceiling on any single delay
    pub max_delay: Duration,
    /// Multiplier applied per subsequent attempt
    pub backoff_factor: f64,
    /// Randomize each delay by up to ±25%
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Deterministic delay taken after failed attempt `attempt` (1-based)
    ///
    /// `min(max_delay, initial_delay * backoff_factor^(attempt-1))`, with no
    /// jitter applied.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// Backoff delay with the randomized offset applied on top
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_delay(attempt);
        if !self.jitter {
            return base;
        }
        let offset = base.as_secs_f64() * rand::thread_rng().gen_range(-0.25..=0.25);
        Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0))
    }
}

/// Outcome of a single attempt, kept for diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    /// 1-based attempt index
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub succeeded: bool,
    /// Failure message when the attempt failed
    pub error: Option<String>,
}

impl AttemptRecord {
    fn success(attempt: u32) -> Self {
        Self {
            attempt,
            timestamp: Utc::now(),
            succeeded: true,
            error: None,
        }
    }

    fn failure(attempt: u32, error: impl fmt::Display) -> Self {
        Self {
            attempt,
            timestamp: Utc::now(),
            succeeded: false,
            error: Some(error.to_string()),
        }
    }
}

/// Successful result together with its attempt history
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: Vec<AttemptRecord>,
}

impl<T> RetryOutcome<T> {
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

/// Failure of an entire [`RetryExecutor::execute`] call
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: fmt::Debug + fmt::Display,
{
    /// The failure was not retryable and propagated immediately
    #[error("non-retryable failure on attempt {}: {source}", .attempts.len())]
    Fatal {
        source: E,
        attempts: Vec<AttemptRecord>,
    },

    /// Every allowed attempt failed
    #[error("retries exhausted after {} attempts: {source}", .attempts.len())]
    Exhausted {
        source: E,
        attempts: Vec<AttemptRecord>,
    },
}

impl<E> RetryError<E>
where
    E: fmt::Debug + fmt::Display,
{
    /// Attempt history accumulated before the failure
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            RetryError::Fatal { attempts, .. } | RetryError::Exhausted { attempts, .. } => attempts,
        }
    }

    /// The last underlying failure
    pub fn inner(&self) -> &E {
        match self {
            RetryError::Fatal { source, .. } | RetryError::Exhausted { source, .. } => source,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal { source, .. } | RetryError::Exhausted { source, .. } => source,
        }
    }
}

/// Errors that can classify themselves for retry purposes
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

/// Drives fallible async operations under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails a non-retryable way, or the
    /// attempt budget runs out
    ///
    /// `retryable` classifies failures; a failure it rejects propagates at
    /// once without consuming a retry. The returned outcome or error always
    /// carries the full attempt history.
    pub async fn execute<T, E, F, Fut, C>(
        &self,
        label: &str,
        mut operation: F,
        retryable: C,
    ) -> Result<RetryOutcome<T>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: fmt::Debug + fmt::Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = Vec::new();

        for attempt in 1..=max_attempts {
            match operation().await {
                Ok(value) => {
                    attempts.push(AttemptRecord::success(attempt));
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}/{}", label, attempt, max_attempts);
                    }
                    return Ok(RetryOutcome { value, attempts });
                }
                Err(error) => {
                    attempts.push(AttemptRecord::failure(attempt, &error));

                    if !retryable(&error) {
                        warn!("{} failed with non-retryable error: {}", label, error);
                        return Err(RetryError::Fatal {
                            source: error,
                            attempts,
                        });
                    }

                    if attempt == max_attempts {
                        warn!(
                            "{} exhausted {} attempts, last error: {}",
                            label, max_attempts, error
                        );
                        return Err(RetryError::Exhausted {
                            source: error,
                            attempts,
                        });
                    }

                    let delay = self.policy.jittered_delay(attempt);
                    debug!(
                        "{} attempt {}/{} failed ({}), retrying in {:.2}s",
                        label,
                        attempt,
                        max_attempts,
                        error,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        unreachable!("retry loop returns from its final attempt")
    }

    /// [`RetryExecutor::execute`] with the classification taken from
    /// [`RetryableError`]
    pub async fn execute_retryable<T, E, F, Fut>(
        &self,
        label: &str,
        operation: F,
    ) -> Result<RetryOutcome<T>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Debug + fmt::Display + RetryableError,
    {
        self.execute(label, operation, |e: &E| e.is_retryable())
            .await
    }
}

/// Free-function form of [`RetryExecutor::execute`]
///
/// Shares the executor's code path, so both forms behave identically.
pub async fn retry_with_backoff<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    label: &str,
    operation: F,
    retryable: C,
) -> Result<RetryOutcome<T>, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: fmt::Debug + fmt::Display,
{
    RetryExecutor::new(policy.clone())
        .execute(label, operation, retryable)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("temporary outage")]
        Transient,
        #[error("bad request")]
        Fatal,
    }

    impl RetryableError for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn flaky_op(
        calls: &Arc<AtomicU32>,
        failures_before_success: u32,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = Result<u32, TestError>> + Send>> {
        let calls = calls.clone();
        move || {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < failures_before_success {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            })
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(RetryPolicy::new(3).without_jitter());

        let outcome = executor
            .execute_retryable("op", flaky_op(&calls, 0))
            .await
            .unwrap();

        assert_eq!(outcome.value, 42);
        assert_eq!(outcome.attempt_count(), 1);
        assert!(outcome.attempts[0].succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3)
            .with_initial_delay(Duration::from_secs(1))
            .with_backoff_factor(2.0)
            .without_jitter();
        let executor = RetryExecutor::new(policy);

        let started = tokio::time::Instant::now();
        let outcome = executor
            .execute_retryable("op", flaky_op(&calls, 2))
            .await
            .unwrap();

        // 1s after the first failure, 2s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(outcome.value, 42);
        assert_eq!(outcome.attempt_count(), 3);
        assert!(!outcome.attempts[0].succeeded);
        assert!(!outcome.attempts[1].succeeded);
        assert!(outcome.attempts[2].succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_carries_full_history() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(RetryPolicy::new(3).without_jitter());

        let err = executor
            .execute_retryable("op", flaky_op(&calls, 10))
            .await
            .unwrap_err();

        match &err {
            RetryError::Exhausted { attempts, source } => {
                assert_eq!(attempts.len(), 3);
                assert!(attempts.iter().all(|a| !a.succeeded));
                assert!(matches!(source, TestError::Transient));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.attempts().len(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_propagates_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(RetryPolicy::new(5).without_jitter());

        let c = calls.clone();
        let err = executor
            .execute_retryable("op", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(TestError::Fatal)
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RetryError::Fatal { .. }));
        assert_eq!(err.attempts().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_delay_is_deterministic_and_capped() {
        let policy = RetryPolicy::new(6)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(10))
            .with_backoff_factor(2.0);

        assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(8));
        // Capped from 16s.
        assert_eq!(policy.backoff_delay(5), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(6), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(3).with_initial_delay(Duration::from_secs(4));

        for _ in 0..200 {
            let jittered = policy.jittered_delay(1).as_secs_f64();
            assert!((3.0..=5.0).contains(&jittered), "jittered was {jittered}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_function_matches_executor() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3).without_jitter();

        let outcome = retry_with_backoff(&policy, "op", flaky_op(&calls, 1), |e| {
            e.is_retryable()
        })
        .await
        .unwrap();

        assert_eq!(outcome.value, 42);
        assert_eq!(outcome.attempt_count(), 2);
    }
}
